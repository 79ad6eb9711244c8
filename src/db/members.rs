//! Company membership lookups.

use anyhow::Result;
use uuid::Uuid;

use super::Database;

impl Database {
    /// Whether `user_id` belongs to `company_id`, in any role.
    pub async fn is_company_member(&self, company_id: Uuid, user_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM company_members WHERE company_id = $1 AND user_id = $2
             )",
        )
        .bind(company_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
