//! Logbook entry operations.
//!
//! Entries are never updated in place. An edit inserts a new version and
//! marks the previous one inactive with `superseded_by` pointing at it; a
//! delete is a soft delete stamping `deleted_at`. Only rows that are active,
//! not superseded, and not deleted are visible to the summary generator.

use anyhow::Result;
use uuid::Uuid;

use super::{has_text, Database, EntryEdit, EntryRow, EntryUpdate, NewEntry};
use crate::summary::{EntryType, ProjectKey};

const ENTRY_COLUMNS: &str = "id, project_id, company_id, entry_type, subtype, text_content,
                             transcript_text, is_active, created_at";

impl Database {
    /// Active entries of one project in chronological order.
    pub async fn get_active_entries(&self, key: ProjectKey) -> Result<Vec<EntryRow>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS}
             FROM entries
             WHERE company_id = $1 AND project_id = $2
               AND is_active AND superseded_by IS NULL AND deleted_at IS NULL
             ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(key.company_id)
            .bind(key.project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn insert_entry(&self, key: ProjectKey, entry: &NewEntry) -> Result<EntryRow> {
        let sql = format!(
            "INSERT INTO entries (project_id, company_id, entry_type, subtype, text_content, transcript_text)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {ENTRY_COLUMNS}"
        );
        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(key.project_id)
            .bind(key.company_id)
            .bind(entry.entry_type.as_str())
            .bind(&entry.subtype)
            .bind(&entry.text_content)
            .bind(&entry.transcript_text)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    /// Supersede an active entry with an edited version, in one transaction.
    ///
    /// The new version keeps the original `entry_type` and `created_at` so the
    /// timeline order is unchanged. A text entry cannot be edited down to
    /// blank content.
    pub async fn supersede_entry(
        &self,
        key: ProjectKey,
        entry_id: Uuid,
        update: &EntryUpdate,
    ) -> Result<EntryEdit> {
        let mut tx = self.pool.begin().await?;

        let select = format!(
            "SELECT {ENTRY_COLUMNS}
             FROM entries
             WHERE id = $1 AND company_id = $2 AND project_id = $3
               AND is_active AND superseded_by IS NULL AND deleted_at IS NULL
             FOR UPDATE"
        );
        let previous = sqlx::query_as::<_, EntryRow>(&select)
            .bind(entry_id)
            .bind(key.company_id)
            .bind(key.project_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(previous) = previous else {
            return Ok(EntryEdit::NotFound);
        };
        let text_content = update.text_content.as_ref().or(previous.text_content.as_ref());
        if previous.entry_type == EntryType::Text.as_str() && !has_text(text_content.map(String::as_str)) {
            return Ok(EntryEdit::Rejected("text entries require text_content"));
        }

        let insert = format!(
            "INSERT INTO entries (project_id, company_id, entry_type, subtype, text_content,
                                  transcript_text, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {ENTRY_COLUMNS}"
        );
        let next = sqlx::query_as::<_, EntryRow>(&insert)
            .bind(key.project_id)
            .bind(key.company_id)
            .bind(&previous.entry_type)
            .bind(update.subtype.as_ref().or(previous.subtype.as_ref()))
            .bind(text_content)
            .bind(update.transcript_text.as_ref().or(previous.transcript_text.as_ref()))
            .bind(previous.created_at)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("UPDATE entries SET is_active = false, superseded_by = $2 WHERE id = $1")
            .bind(previous.id)
            .bind(next.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(EntryEdit::Superseded(next))
    }

    /// Soft-delete an active entry. Returns its type, or `None` if no active
    /// entry matched.
    pub async fn soft_delete_entry(&self, key: ProjectKey, entry_id: Uuid) -> Result<Option<EntryType>> {
        let entry_type: Option<String> = sqlx::query_scalar(
            "UPDATE entries
             SET is_active = false, deleted_at = NOW()
             WHERE id = $1 AND company_id = $2 AND project_id = $3
               AND is_active AND deleted_at IS NULL
             RETURNING entry_type",
        )
        .bind(entry_id)
        .bind(key.company_id)
        .bind(key.project_id)
        .fetch_optional(&self.pool)
        .await?;
        entry_type.map(|t| t.parse()).transpose()
    }
}
