//! The summary state machine: debounced notification and the shared
//! manual/scheduled generation procedure.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::generator::placeholder_variants;
use super::{
    apply_entry_change, eligible_count, is_stale_generation, mark_blocked, mark_failed,
    merge_generated, BlockReason, EntryType, GenerationMode, ProjectKey, SchedulerConfig,
    SkipReason, SummaryGenerator, SummaryState, SummaryStore, TimerRegistry, TriggerOutcome,
};
use crate::prom_metrics::{Metrics, TriggerLabel};

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    store: Arc<dyn SummaryStore>,
    generator: Arc<dyn SummaryGenerator>,
    config: SchedulerConfig,
    in_flight: Mutex<HashSet<ProjectKey>>,
    timers: Arc<TimerRegistry>,
    metrics: Option<Arc<Metrics>>,
}

/// Owns the in-flight lock set and the timer registry. Construct once at
/// startup and share by cloning; clones refer to the same state.
#[derive(Clone)]
pub struct SummaryScheduler {
    inner: Arc<Inner>,
}

/// Holds the in-process generation lock for one project; released on drop,
/// including when the owning future is cancelled or panics.
struct GenerationGuard<'a> {
    in_flight: &'a Mutex<HashSet<ProjectKey>>,
    key: ProjectKey,
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        lock_or_recover(self.in_flight).remove(&self.key);
    }
}

impl SummaryScheduler {
    pub fn new(
        store: Arc<dyn SummaryStore>,
        generator: Arc<dyn SummaryGenerator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                generator,
                config: config.normalized(),
                in_flight: Mutex::new(HashSet::new()),
                timers: TimerRegistry::new(),
                metrics: None,
            }),
        }
    }

    /// Same as [`SummaryScheduler::new`], reporting outcomes and timer counts
    /// into `metrics`.
    pub fn with_metrics(
        store: Arc<dyn SummaryStore>,
        generator: Arc<dyn SummaryGenerator>,
        config: SchedulerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                generator,
                config: config.normalized(),
                in_flight: Mutex::new(HashSet::new()),
                timers: TimerRegistry::new(),
                metrics: Some(metrics),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.pending_count()
    }

    pub fn timer_due_at(&self, key: ProjectKey) -> Option<DateTime<Utc>> {
        self.inner.timers.due_at(key)
    }

    pub fn is_generating(&self, key: ProjectKey) -> bool {
        lock_or_recover(&self.inner.in_flight).contains(&key)
    }

    /// Cancel every pending timer. In-flight generations run to completion.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.inner.timers.cancel_all();
        self.refresh_timer_gauge();
        info!(cancelled, "summary scheduler stopped");
        cancelled
    }

    /// Re-arm timers for projects persisted as `scheduled` by a previous
    /// process. Past due times fire immediately.
    pub fn resume_pending(&self, pending: &[(ProjectKey, DateTime<Utc>)]) -> usize {
        let mut armed = 0;
        for &(key, due) in pending {
            if self.inner.timers.arm(key, due, self.scheduled_run(key)) {
                armed += 1;
            }
        }
        self.refresh_timer_gauge();
        if armed > 0 {
            info!(armed, "resumed pending summary timers");
        }
        armed
    }

    // ── Entry notifications ─────────────────────────────────────

    /// Record an entry mutation and make sure a generation is due.
    ///
    /// Fire-and-forget: storage errors are logged, never returned.
    pub async fn notify_entry_changed(&self, key: ProjectKey, entry_type: EntryType) {
        if !entry_type.is_eligible() {
            debug!(company = %key.company_id, project = %key.project_id, %entry_type, "entry type does not affect summaries");
            return;
        }
        if let Err(e) = self.record_entry_change(key).await {
            warn!(company = %key.company_id, project = %key.project_id, error = %e, "failed to schedule summary regeneration");
        }
    }

    async fn record_entry_change(&self, key: ProjectKey) -> Result<()> {
        let now = Utc::now();
        let mut meta = self.inner.store.read_metadata(key).await?.unwrap_or_default();
        let due = apply_entry_change(&mut meta, now, self.inner.config.debounce);
        self.inner.store.write_metadata(key, &meta).await?;

        let armed = self.inner.timers.arm(key, due, self.scheduled_run(key));
        self.refresh_timer_gauge();
        debug!(company = %key.company_id, project = %key.project_id, state = meta.state.as_str(), %due, armed, "summary marked dirty");
        Ok(())
    }

    // ── Generation ──────────────────────────────────────────────

    /// Run the generation procedure for one project.
    ///
    /// Never fails: contention, preconditions, generator errors, and storage
    /// errors all come back as a [`TriggerOutcome`].
    pub async fn trigger_generation(&self, key: ProjectKey, mode: GenerationMode) -> TriggerOutcome {
        let outcome = match self.try_lock(key) {
            None => {
                debug!(company = %key.company_id, project = %key.project_id, mode = mode.as_str(), "summary generation already running in-process");
                TriggerOutcome::Skipped {
                    reason: SkipReason::AlreadyGenerating,
                }
            }
            Some(_guard) => {
                if mode == GenerationMode::Manual && self.inner.timers.cancel(key) {
                    self.refresh_timer_gauge();
                }
                match self.generate_locked(key, mode).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(company = %key.company_id, project = %key.project_id, mode = mode.as_str(), error = %e, "summary generation aborted on storage error");
                        TriggerOutcome::Skipped {
                            reason: SkipReason::StorageError,
                        }
                    }
                }
            }
        };
        self.record_outcome(mode, &outcome);
        outcome
    }

    fn try_lock(&self, key: ProjectKey) -> Option<GenerationGuard<'_>> {
        let mut in_flight = lock_or_recover(&self.inner.in_flight);
        if !in_flight.insert(key) {
            return None;
        }
        Some(GenerationGuard {
            in_flight: &self.inner.in_flight,
            key,
        })
    }

    async fn generate_locked(&self, key: ProjectKey, mode: GenerationMode) -> Result<TriggerOutcome> {
        let config = &self.inner.config;
        let store = &self.inner.store;
        let now = Utc::now();

        let current = store.read_metadata(key).await?.unwrap_or_default();
        if current.state == SummaryState::Generating {
            let stale = is_stale_generation(&current, now, config.stale_after);
            if !stale || mode == GenerationMode::Scheduled {
                return Ok(TriggerOutcome::Skipped {
                    reason: SkipReason::AlreadyGenerating,
                });
            }
            warn!(
                company = %key.company_id,
                project = %key.project_id,
                started_at = ?current.generation_started_at,
                "taking over abandoned summary generation"
            );
        }

        if mode == GenerationMode::Scheduled {
            if !matches!(current.state, SummaryState::Scheduled | SummaryState::Dirty) {
                return Ok(TriggerOutcome::Skipped {
                    reason: SkipReason::NotScheduled,
                });
            }
            if let Some(due) = current.scheduled_for {
                if due > super::saturating_after(now, config.due_tolerance) {
                    self.rearm(key, due);
                    return Ok(TriggerOutcome::Skipped {
                        reason: SkipReason::NotDue,
                    });
                }
            }
        }

        // Durability point: past this write a crash leaves the row in
        // `generating` until a manual trigger takes it over.
        let started_at = now;
        let mut generating = current;
        generating.state = SummaryState::Generating;
        generating.generation_started_at = Some(started_at);
        store.write_metadata(key, &generating).await?;
        info!(company = %key.company_id, project = %key.project_id, mode = mode.as_str(), "summary generation started");

        let entries: Vec<_> = store
            .list_active_entries(key)
            .await?
            .into_iter()
            .filter(|e| e.is_active)
            .collect();
        let eligible = eligible_count(&entries);

        let variants = if eligible == 0 {
            placeholder_variants()
        } else if eligible < config.min_eligible_entries {
            let fresh = store.read_metadata(key).await?.unwrap_or(generating);
            let (blocked, follow_up) = mark_blocked(fresh, started_at, Utc::now(), config.debounce);
            store.write_metadata(key, &blocked).await?;
            if let Some(due) = follow_up {
                self.rearm(key, due);
            }
            info!(company = %key.company_id, project = %key.project_id, eligible, min = config.min_eligible_entries, "summary generation blocked: not enough entries");
            return Ok(TriggerOutcome::Blocked {
                reason: BlockReason::NotEnoughEntries,
                metadata: blocked,
            });
        } else {
            let timer = std::time::Instant::now();
            let result =
                tokio::time::timeout(config.generation_timeout, self.inner.generator.generate(&entries)).await;
            if let Some(metrics) = &self.inner.metrics {
                metrics.generation_seconds.observe(timer.elapsed().as_secs_f64());
            }
            let attempt = match result {
                Ok(Ok(variants)) => Ok(variants),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {:?}", config.generation_timeout)),
            };
            match attempt {
                Ok(variants) => variants,
                Err(reason) => {
                    warn!(company = %key.company_id, project = %key.project_id, error = %reason, "summary generator failed");
                    let fresh = store.read_metadata(key).await?.unwrap_or(generating);
                    store.write_metadata(key, &mark_failed(fresh)).await?;
                    return Ok(TriggerOutcome::Skipped {
                        reason: SkipReason::GenerationFailed,
                    });
                }
            }
        };

        let fresh = store.read_metadata(key).await?.unwrap_or(generating);
        let (merged, follow_up) = merge_generated(fresh, variants, started_at, Utc::now(), config.debounce);
        store.write_metadata(key, &merged).await?;
        match follow_up {
            Some(due) => {
                self.rearm(key, due);
                info!(company = %key.company_id, project = %key.project_id, %due, "summary generated; entries changed meanwhile, rescheduled");
            }
            None => {
                info!(company = %key.company_id, project = %key.project_id, eligible, "summary generated");
            }
        }
        Ok(TriggerOutcome::Generated { metadata: merged })
    }

    // ── Timers ──────────────────────────────────────────────────

    fn scheduled_run(&self, key: ProjectKey) -> impl std::future::Future<Output = ()> + Send + 'static {
        let scheduler = self.clone();
        async move {
            scheduler.refresh_timer_gauge();
            scheduler.trigger_generation(key, GenerationMode::Scheduled).await;
        }
    }

    fn rearm(&self, key: ProjectKey, due: DateTime<Utc>) {
        self.inner.timers.rearm(key, due, self.scheduled_run(key));
        self.refresh_timer_gauge();
    }

    // ── Metrics ─────────────────────────────────────────────────

    fn refresh_timer_gauge(&self) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.timers_armed.set(self.inner.timers.pending_count() as i64);
        }
    }

    fn record_outcome(&self, mode: GenerationMode, outcome: &TriggerOutcome) {
        if let Some(metrics) = &self.inner.metrics {
            metrics
                .summary_triggers
                .get_or_create(&TriggerLabel {
                    mode: mode.as_str().to_string(),
                    status: outcome.status().to_string(),
                })
                .inc();
        }
    }
}
