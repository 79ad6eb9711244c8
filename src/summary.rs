//! # Summary - Debounced AI Summary Scheduling
//!
//! Keeps four derived text variants per project (artisan/client × short/detail)
//! in sync with the project's logbook entries. Regeneration is debounced,
//! guarded against concurrent runs, and tolerant of crashes mid-generation.
//!
//! ## Architecture
//!
//! ```text
//! entry create/edit/delete → SummaryScheduler::notify_entry_changed()
//!     ↓ persist dirty/scheduled metadata, arm timer (scheduled_for)
//! timer fires / manual request → SummaryScheduler::trigger_generation()
//!     ↓ lock (company, project) → mark generating → list active entries
//! SummaryGenerator::generate(full timeline)
//!     ↓ re-read metadata, merge variants, detect mid-generation writes
//! ready  (or scheduled again + re-armed timer when entries raced the run)
//! ```
//!
//! ## State Machine
//!
//! | From | Event | To |
//! |------|-------|----|
//! | any but `generating` | eligible entry change | `scheduled` |
//! | `scheduled` / `dirty` | timer due, or manual | `generating` |
//! | `generating` | < min eligible entries | `blocked` |
//! | `generating` | generator error / timeout | `dirty` |
//! | `generating` | success | `ready` |
//! | `generating` | success, entries arrived meanwhile | `scheduled` |
//!
//! All state lives in the project's metadata document under the `summary`
//! key. The only process-local state is the per-project lock set and the
//! timer registry, both owned by one [`SummaryScheduler`] instance.
//!
//! ## Limitations
//!
//! The lock is in-process only. Two server instances can generate the same
//! project concurrently; the merge in step 9 tolerates this, but the later
//! write wins. Run with sticky routing per project if that matters.

mod generator;
mod scheduler;
mod store;
mod timers;


pub use generator::{
    build_timeline, parse_variants, placeholder_variants, LlmConfig, LlmGenerator,
    SummaryGenerator, DEFAULT_LLM_API_URL, DEFAULT_LLM_MODEL, PLACEHOLDER_SUMMARY,
};
pub use scheduler::SummaryScheduler;
pub use store::SummaryStore;
pub use timers::TimerRegistry;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Debounce window applied after the first eligible change.
pub const DEFAULT_DEBOUNCE_SECS: u64 = 45;
/// Longest accepted debounce window (one day).
pub const MAX_DEBOUNCE_SECS: u64 = 86_400;
/// Fewer eligible entries than this blocks generation.
pub const MIN_ELIGIBLE_ENTRIES: usize = 2;
/// A scheduled trigger this close to its due time still counts as due.
pub const DUE_TOLERANCE: Duration = Duration::from_secs(1);
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_STALE_SECS: u64 = 300;

// ── Identity ────────────────────────────────────────────────────

/// Composite (tenant, project) key. Every lock and timer is keyed by both
/// ids so two companies can never interfere with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectKey {
    pub company_id: Uuid,
    pub project_id: Uuid,
}

impl ProjectKey {
    pub fn new(company_id: Uuid, project_id: Uuid) -> Self {
        Self {
            company_id,
            project_id,
        }
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.company_id, self.project_id)
    }
}

// ── Entries ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Text,
    Photo,
    Audio,
}

impl EntryType {
    /// Text notes and audio memos count toward summaries; photos never do.
    pub fn is_eligible(self) -> bool {
        matches!(self, EntryType::Text | EntryType::Audio)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Text => "text",
            EntryType::Photo => "photo",
            EntryType::Audio => "audio",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(EntryType::Text),
            "photo" => Ok(EntryType::Photo),
            "audio" => Ok(EntryType::Audio),
            other => anyhow::bail!("unknown entry type: {}", other),
        }
    }
}

/// One logged unit of project activity, as handed to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub entry_type: EntryType,
    pub text_content: Option<String>,
    pub transcript_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub subtype: Option<String>,
    pub is_active: bool,
}

/// Count entries whose type makes them eligible summary input.
pub fn eligible_count(entries: &[Entry]) -> usize {
    entries
        .iter()
        .filter(|e| e.is_active && e.entry_type.is_eligible())
        .count()
}

// ── Metadata document ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryState {
    #[default]
    Idle,
    Dirty,
    Scheduled,
    Generating,
    Ready,
    Blocked,
}

impl SummaryState {
    pub fn as_str(self) -> &'static str {
        match self {
            SummaryState::Idle => "idle",
            SummaryState::Dirty => "dirty",
            SummaryState::Scheduled => "scheduled",
            SummaryState::Generating => "generating",
            SummaryState::Ready => "ready",
            SummaryState::Blocked => "blocked",
        }
    }
}

/// The `summary` key of a project's metadata document.
///
/// Keys this type does not know about are kept in `extra` and written back
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    #[serde(default)]
    pub state: SummaryState,
    #[serde(default)]
    pub artisan_short: Option<String>,
    #[serde(default)]
    pub artisan_detail: Option<String>,
    #[serde(default)]
    pub client_short: Option<String>,
    #[serde(default)]
    pub client_detail: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dirty_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_entry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub generation_started_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The four generated text variants, replaced wholesale on each success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryVariants {
    pub artisan_short: String,
    pub artisan_detail: String,
    pub client_short: String,
    pub client_detail: String,
}

// ── Trigger API ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Manual,
    Scheduled,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::Manual => "manual",
            GenerationMode::Scheduled => "scheduled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyGenerating,
    NotScheduled,
    NotDue,
    GenerationFailed,
    StorageError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    NotEnoughEntries,
}

/// Structured result of one trigger. Failures never escape as errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Generated {
        metadata: SummaryMetadata,
    },
    Blocked {
        reason: BlockReason,
        metadata: SummaryMetadata,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl TriggerOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            TriggerOutcome::Generated { .. } => "generated",
            TriggerOutcome::Blocked { .. } => "blocked",
            TriggerOutcome::Skipped { .. } => "skipped",
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            TriggerOutcome::Skipped { reason } => Some(*reason),
            _ => None,
        }
    }

    pub fn metadata(&self) -> Option<&SummaryMetadata> {
        match self {
            TriggerOutcome::Generated { metadata } | TriggerOutcome::Blocked { metadata, .. } => {
                Some(metadata)
            }
            TriggerOutcome::Skipped { .. } => None,
        }
    }
}

// ── Configuration ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub debounce: Duration,
    pub min_eligible_entries: usize,
    pub due_tolerance: Duration,
    /// Upper bound on a single generator call.
    pub generation_timeout: Duration,
    /// A `generating` row older than this is treated as abandoned by a crash.
    pub stale_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(DEFAULT_DEBOUNCE_SECS),
            min_eligible_entries: MIN_ELIGIBLE_ENTRIES,
            due_tolerance: DUE_TOLERANCE,
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
            stale_after: Duration::from_secs(DEFAULT_STALE_SECS),
        }
    }
}

impl SchedulerConfig {
    /// Clamp inconsistent settings: the stale window must cover a whole
    /// generator call, otherwise a live run could be taken over.
    ///
    /// The debounce window is capped at [`MAX_DEBOUNCE_SECS`].
    pub fn normalized(mut self) -> Self {
        self.debounce = self.debounce.min(Duration::from_secs(MAX_DEBOUNCE_SECS));
        if self.stale_after < self.generation_timeout {
            self.stale_after = self.generation_timeout;
        }
        self
    }
}

pub(crate) fn delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// `at + d`, saturating at the latest representable instant.
pub(crate) fn saturating_after(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta(d)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ── Policy ──────────────────────────────────────────────────────

/// Apply one eligible entry change to the metadata and return the due time
/// the timer should be armed for.
///
/// An existing future `scheduled_for` is kept, so a burst of edits cannot
/// push generation out indefinitely.
pub fn apply_entry_change(
    meta: &mut SummaryMetadata,
    now: DateTime<Utc>,
    debounce: Duration,
) -> DateTime<Utc> {
    let due = match meta.scheduled_for {
        Some(at) if at > now => at,
        _ => saturating_after(now, debounce),
    };
    meta.scheduled_for = Some(due);
    if meta.state != SummaryState::Generating {
        meta.state = SummaryState::Scheduled;
    }
    meta.dirty_at = Some(now);
    meta.last_entry_at = Some(now);
    due
}

/// True when an entry change was observed after the generation started.
pub fn entries_changed_since(meta: &SummaryMetadata, started_at: DateTime<Utc>) -> bool {
    matches!(meta.last_entry_at, Some(last) if last > started_at)
}

/// Whether a `generating` row has outlived any plausible in-flight run.
pub fn is_stale_generation(meta: &SummaryMetadata, now: DateTime<Utc>, stale_after: Duration) -> bool {
    match meta.generation_started_at {
        Some(started) => now - started > delta(stale_after),
        None => true,
    }
}

/// Put the metadata back in the scheduled state after a run raced new
/// entries. Returns the new due time.
fn reschedule_after_race(
    meta: &mut SummaryMetadata,
    prior_dirty_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    debounce: Duration,
) -> DateTime<Utc> {
    let last = meta.last_entry_at.unwrap_or(now);
    let due = std::cmp::max(saturating_after(last, debounce), now);
    meta.state = SummaryState::Scheduled;
    meta.dirty_at = prior_dirty_at.or(meta.last_entry_at);
    meta.scheduled_for = Some(due);
    due
}

/// Merge freshly generated variants into the re-read metadata.
///
/// Returns the merged document and, when entries arrived after
/// `started_at`, the due time for the follow-up run.
pub fn merge_generated(
    fresh: SummaryMetadata,
    variants: SummaryVariants,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    debounce: Duration,
) -> (SummaryMetadata, Option<DateTime<Utc>>) {
    let raced = entries_changed_since(&fresh, started_at);
    let prior_dirty_at = fresh.dirty_at;

    let mut merged = fresh;
    merged.artisan_short = Some(variants.artisan_short);
    merged.artisan_detail = Some(variants.artisan_detail);
    merged.client_short = Some(variants.client_short);
    merged.client_detail = Some(variants.client_detail);
    merged.updated_at = Some(now);
    merged.state = SummaryState::Ready;
    merged.scheduled_for = None;
    merged.dirty_at = None;
    merged.generation_started_at = None;

    let follow_up = raced.then(|| reschedule_after_race(&mut merged, prior_dirty_at, now, debounce));
    (merged, follow_up)
}

/// Mark a run as blocked on too few entries, unless entries arrived while it
/// was counting, in which case it is rescheduled instead.
pub fn mark_blocked(
    fresh: SummaryMetadata,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    debounce: Duration,
) -> (SummaryMetadata, Option<DateTime<Utc>>) {
    let raced = entries_changed_since(&fresh, started_at);
    let prior_dirty_at = fresh.dirty_at;

    let mut blocked = fresh;
    blocked.state = SummaryState::Blocked;
    blocked.scheduled_for = None;
    blocked.generation_started_at = None;

    let follow_up = raced.then(|| reschedule_after_race(&mut blocked, prior_dirty_at, now, debounce));
    (blocked, follow_up)
}

/// Revert a failed run to `dirty`. Text variants are left untouched.
pub fn mark_failed(mut fresh: SummaryMetadata) -> SummaryMetadata {
    fresh.state = SummaryState::Dirty;
    fresh.scheduled_for = None;
    fresh.generation_started_at = None;
    fresh
}
