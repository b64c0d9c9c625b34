//! Deadline scheduler.
//!
//! Turns entity-declared wake-up instants into events for the reactor. Each
//! entity has at most one pending timer; re-arming replaces it. Fired
//! entities collect in a set that the reactor drains with
//! [`Scheduler::get`] after [`Scheduler::wait`] returns. Fires that happen
//! before the reactor gets round to waiting coalesce into one wake-up.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use replica_schema::Eid;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::trace;

struct Timer {
    generation: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct Inner {
    timers: DashMap<Eid, Timer>,
    fired: Mutex<BTreeSet<Eid>>,
    wake: Notify,
    generations: AtomicU64,
}

/// Per-entity timers feeding a coalesced wake-up signal.
///
/// Timers run as tokio tasks, so [`Scheduler::schedule`] must be called from
/// within a runtime. Dropping the scheduler cancels every timer.
#[derive(Default)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler with no timers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm, re-arm or cancel (`when == None`) the timer for `eid`.
    ///
    /// Instants already in the past fire immediately.
    pub fn schedule(&self, eid: Eid, when: Option<DateTime<Utc>>) {
        let Some(when) = when else {
            if let Some((_, timer)) = self.inner.timers.remove(&eid) {
                timer.handle.abort();
            }
            self.inner.fired.lock().remove(&eid);
            return;
        };

        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let delay = (when - Utc::now()).to_std().unwrap_or_default();

        // The entry guard keeps the new task from observing the map before
        // its own timer is in it.
        let entry = self.inner.timers.entry(eid.clone());
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = inner
                .timers
                .remove_if(&eid, |_, timer| timer.generation == generation)
                .is_some();
            if current {
                trace!(%eid, "deadline fired");
                inner.fired.lock().insert(eid);
                inner.wake.notify_one();
            }
        });
        let timer = Timer {
            generation,
            handle: task.abort_handle(),
        };
        match entry {
            Entry::Occupied(mut slot) => slot.insert(timer).handle.abort(),
            Entry::Vacant(slot) => {
                slot.insert(timer);
            }
        }
    }

    /// Drain the set of entities whose timers fired, in address order.
    #[must_use]
    pub fn get(&self) -> Vec<Eid> {
        std::mem::take(&mut *self.inner.fired.lock()).into_iter().collect()
    }

    /// Cancel every timer and forget every undrained fire.
    pub fn clear(&self) {
        self.inner.timers.retain(|_, timer| {
            timer.handle.abort();
            false
        });
        self.inner.fired.lock().clear();
    }

    /// Number of armed timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.timers.len()
    }

    /// Returns `true` if no timer is armed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.timers.is_empty()
    }

    /// Wait for the next wake-up.
    ///
    /// Resolves immediately if a timer fired since the previous wake-up was
    /// consumed.
    pub async fn wait(&self) {
        self.inner.wake.notified().await;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("timers", &self.inner.timers.len())
            .field("fired", &self.inner.fired.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;

    fn eid(id: &str) -> Eid {
        Eid::new("lease", id)
    }

    fn in_secs(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc::now() + TimeDelta::seconds(secs))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_deadline() {
        let scheduler = Scheduler::new();
        scheduler.schedule(eid("a"), in_secs(5));
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(scheduler.get().is_empty());

        scheduler.wait().await;
        assert_eq!(scheduler.get(), vec![eid("a")]);
        assert!(scheduler.get().is_empty());
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_fires_immediately() {
        let scheduler = Scheduler::new();
        scheduler.schedule(eid("a"), in_secs(-60));
        scheduler.wait().await;
        assert_eq!(scheduler.get(), vec![eid("a")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_timer() {
        let scheduler = Scheduler::new();
        scheduler.schedule(eid("a"), in_secs(1));
        scheduler.schedule(eid("a"), in_secs(10));
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(scheduler.get().is_empty());

        scheduler.wait().await;
        assert_eq!(scheduler.get(), vec![eid("a")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let scheduler = Scheduler::new();
        scheduler.schedule(eid("a"), in_secs(1));
        scheduler.schedule(eid("a"), None);
        assert!(scheduler.is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(scheduler.get().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_coalesce_into_one_wake() {
        let scheduler = Scheduler::new();
        scheduler.schedule(eid("b"), in_secs(1));
        scheduler.schedule(eid("a"), in_secs(2));
        tokio::time::sleep(Duration::from_secs(3)).await;

        scheduler.wait().await;
        assert_eq!(scheduler.get(), vec![eid("a"), eid("b")]);

        // Both fires were consumed by the single wake-up above.
        let again = tokio::time::timeout(Duration::from_secs(60), scheduler.wait()).await;
        assert!(again.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_everything() {
        let scheduler = Scheduler::new();
        scheduler.schedule(eid("a"), in_secs(1));
        scheduler.schedule(eid("b"), in_secs(2));
        scheduler.clear();
        assert!(scheduler.is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(scheduler.get().is_empty());
    }
}
