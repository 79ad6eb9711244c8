//! Project summary metadata.
//!
//! The summary document is stored under the `summary` key of
//! `projects.metadata`. Writes replace that key only, via `jsonb_set`, so
//! whatever else the application keeps in `metadata` is carried forward.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::Database;
use crate::summary::{ProjectKey, SummaryMetadata, SummaryState};

impl Database {
    /// Whether the project exists and belongs to `key.company_id`.
    pub async fn project_exists(&self, key: ProjectKey) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM projects WHERE company_id = $1 AND id = $2
             )",
        )
        .bind(key.company_id)
        .bind(key.project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Read the summary document of one project.
    ///
    /// `None` when the project does not exist in that company or has never
    /// had a summary document.
    pub async fn get_summary_metadata(&self, key: ProjectKey) -> Result<Option<SummaryMetadata>> {
        let row: Option<(Option<Value>,)> = sqlx::query_as(
            "SELECT metadata -> 'summary'
             FROM projects
             WHERE company_id = $1 AND id = $2",
        )
        .bind(key.company_id)
        .bind(key.project_id)
        .fetch_optional(&self.pool)
        .await?;

        match row.and_then(|(doc,)| doc) {
            Some(Value::Null) | None => Ok(None),
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
        }
    }

    /// Replace the summary document of one project, leaving every other
    /// metadata key untouched. Fails if the project does not exist.
    pub async fn put_summary_metadata(&self, key: ProjectKey, metadata: &SummaryMetadata) -> Result<()> {
        let doc = serde_json::to_value(metadata)?;
        let result = sqlx::query(
            "UPDATE projects
             SET metadata = jsonb_set(COALESCE(metadata, '{}'::jsonb), '{summary}', $3::jsonb, true)
             WHERE company_id = $1 AND id = $2",
        )
        .bind(key.company_id)
        .bind(key.project_id)
        .bind(doc)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("project {} not found", key);
        }
        Ok(())
    }

    /// Projects whose summary is waiting on a debounce timer, with the due
    /// time. Used at startup to re-arm timers lost with the previous process.
    pub async fn get_scheduled_summaries(&self) -> Result<Vec<(ProjectKey, DateTime<Utc>)>> {
        let rows: Vec<(Uuid, Uuid, Value)> = sqlx::query_as(
            "SELECT company_id, id, metadata -> 'summary'
             FROM projects
             WHERE metadata -> 'summary' ->> 'state' = 'scheduled'",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for (company_id, project_id, doc) in rows {
            let meta: SummaryMetadata = serde_json::from_value(doc)?;
            if let (SummaryState::Scheduled, Some(due)) = (meta.state, meta.scheduled_for) {
                pending.push((ProjectKey::new(company_id, project_id), due));
            }
        }
        Ok(pending)
    }
}
