//! Per-project delayed tasks.
//!
//! At most one timer exists per [`ProjectKey`]. Each armed timer is a tokio
//! task sleeping until its due time, held through its `JoinHandle` so it can
//! be cancelled or replaced explicitly. A timer that fires removes itself
//! from the registry before running its callback, so the callback is free to
//! arm the next one.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::ProjectKey;

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PendingTimer {
    token: u64,
    due_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<ProjectKey, PendingTimer>>,
    next_token: AtomicU64,
}

impl TimerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Arm a timer unless one is already pending for `key`.
    /// Returns false (and drops `on_fire`) when one was already armed.
    pub fn arm<F>(self: &Arc<Self>, key: ProjectKey, due_at: DateTime<Utc>, on_fire: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut timers = lock_or_recover(&self.timers);
        if timers.contains_key(&key) {
            return false;
        }
        let timer = self.spawn(key, due_at, on_fire);
        timers.insert(key, timer);
        debug!(%key, %due_at, "summary timer armed");
        true
    }

    /// Arm a timer for `due_at`, replacing any pending one.
    pub fn rearm<F>(self: &Arc<Self>, key: ProjectKey, due_at: DateTime<Utc>, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut timers = lock_or_recover(&self.timers);
        let timer = self.spawn(key, due_at, on_fire);
        if let Some(previous) = timers.insert(key, timer) {
            previous.handle.abort();
        }
        debug!(%key, %due_at, "summary timer re-armed");
    }

    /// Cancel the pending timer for `key`. Returns true if one was pending.
    pub fn cancel(&self, key: ProjectKey) -> bool {
        match lock_or_recover(&self.timers).remove(&key) {
            Some(timer) => {
                timer.handle.abort();
                debug!(%key, "summary timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Abort every pending timer (process shutdown).
    pub fn cancel_all(&self) -> usize {
        let mut timers = lock_or_recover(&self.timers);
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        count
    }

    pub fn due_at(&self, key: ProjectKey) -> Option<DateTime<Utc>> {
        lock_or_recover(&self.timers).get(&key).map(|t| t.due_at)
    }

    pub fn pending_count(&self) -> usize {
        lock_or_recover(&self.timers).len()
    }

    fn spawn<F>(self: &Arc<Self>, key: ProjectKey, due_at: DateTime<Utc>, on_fire: F) -> PendingTimer
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let wait = (due_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            if registry.release(key, token) {
                on_fire.await;
            }
        });
        PendingTimer {
            token,
            due_at,
            handle,
        }
    }

    /// Remove a fired timer, but only if it has not been replaced meanwhile.
    fn release(&self, key: ProjectKey, token: u64) -> bool {
        let mut timers = lock_or_recover(&self.timers);
        match timers.get(&key) {
            Some(timer) if timer.token == token => {
                timers.remove(&key);
                true
            }
            _ => false,
        }
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        for timer in lock_or_recover(&self.timers).values() {
            timer.handle.abort();
        }
    }
}
