//! # Database - PostgreSQL Storage Layer
//!
//! Async access to the logbook tables via `sqlx::PgPool` connecting to
//! Supabase PostgreSQL.
//!
//! ## Schema
//!
//! - `companies`: tenants
//! - `company_members`: (company_id, user_id, role) membership rows
//! - `projects`: per-company projects with a free-form `metadata` JSONB document;
//!   the summary state lives under its `summary` key
//! - `entries`: versioned logbook entries (text, photo, audio); edits insert a
//!   new row and point the old one at it through `superseded_by`
//!
//! ## Module Structure
//!
//! - [`projects`] - summary metadata read and key-scoped write
//! - [`entries`] - entry listing, creation, supersede-on-edit, soft delete
//! - [`members`] - company membership lookup for request authorization
//!
//! `Database` implements [`SummaryStore`], so the scheduler talks to Postgres
//! through the same three operations it uses against the in-memory test store.

mod entries;
mod members;
mod projects;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::summary::{Entry, EntryType, ProjectKey, SummaryMetadata, SummaryStore};

// ── Entry types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EntryRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub company_id: Uuid,
    pub entry_type: String,
    pub subtype: Option<String>,
    pub text_content: Option<String>,
    pub transcript_text: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for Entry {
    type Error = anyhow::Error;

    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(Entry {
            id: row.id,
            entry_type: row.entry_type.parse()?,
            text_content: row.text_content,
            transcript_text: row.transcript_text,
            created_at: row.created_at,
            subtype: row.subtype,
            is_active: row.is_active,
        })
    }
}

/// Payload for a new entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEntry {
    pub entry_type: EntryType,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub transcript_text: Option<String>,
}

/// Whether `text` carries non-whitespace content.
pub fn has_text(text: Option<&str>) -> bool {
    text.is_some_and(|t| !t.trim().is_empty())
}

/// Result of an edit request.
#[derive(Debug)]
pub enum EntryEdit {
    /// The new version that replaced the entry.
    Superseded(EntryRow),
    /// No active entry with that id in the project.
    NotFound,
    /// The merged version would break an entry rule; nothing was written.
    Rejected(&'static str),
}

/// Payload for an edit. Absent fields keep the previous version's value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryUpdate {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub transcript_text: Option<String>,
}

// ── Connection ──────────────────────────────────────────────────

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// Manually parses the URL to preserve the full username. sqlx's built-in
    /// parser strips the ".project-ref" suffix that Supabase pooler requires.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check: execute `SELECT 1` to verify database connectivity.
    ///
    /// Used by the `/readyz` readiness probe.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SummaryStore for Database {
    async fn read_metadata(&self, key: ProjectKey) -> Result<Option<SummaryMetadata>> {
        self.get_summary_metadata(key).await
    }

    async fn write_metadata(&self, key: ProjectKey, metadata: &SummaryMetadata) -> Result<()> {
        self.put_summary_metadata(key, metadata).await
    }

    async fn list_active_entries(&self, key: ProjectKey) -> Result<Vec<Entry>> {
        self.get_active_entries(key)
            .await?
            .into_iter()
            .map(Entry::try_from)
            .collect()
    }
}

// ── Tests ───────────────────────────────────────────────────────
