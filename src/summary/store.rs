//! Storage seam between the scheduler and the metadata/entry backend.
//!
//! Each call is atomic on its own; nothing is transactional across calls,
//! so concurrent writers to one project are last-write-wins.

use anyhow::Result;
use async_trait::async_trait;

use super::{Entry, ProjectKey, SummaryMetadata};

#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// `None` when the project has no summary metadata yet (treated as idle).
    async fn read_metadata(&self, key: ProjectKey) -> Result<Option<SummaryMetadata>>;

    /// Replace the summary document, carrying other metadata keys forward.
    async fn write_metadata(&self, key: ProjectKey, metadata: &SummaryMetadata) -> Result<()>;

    /// Entries that are neither soft-deleted nor superseded, oldest first.
    async fn list_active_entries(&self, key: ProjectKey) -> Result<Vec<Entry>>;
}
