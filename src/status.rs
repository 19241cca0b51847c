// ============================================================================
// Save Status Tracker
// ============================================================================

use crate::core::{EntityId, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// The global save indicator shown by the presentation layer.
///
/// Purely observational; it never gates whether an operation may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
    Error,
}

/// Per-entity transient write state, for indicators near the affected entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityWriteState {
    /// No write outstanding; nothing to show.
    Clean,
    /// A coalesced write for this entity is in flight.
    Saving,
    /// The last write was acknowledged at the given time ("saved Nm ago").
    Saved { at: DateTime<Utc> },
    /// The last write failed; the local payload is kept, the user may retry.
    Error,
}

struct TrackerCore {
    in_flight: usize,
    sticky_error: bool,
    last_outcome: Option<bool>,
    last_saved_instant: Option<Instant>,
    last_saved_time: Option<DateTime<Utc>>,
    entity_states: HashMap<EntityId, EntityWriteState>,
}

/// Derives idle/saving/saved/error from in-flight operation counts.
///
/// `saving` wins while anything is in flight; a failure is sticky until the
/// next success or an explicit dismissal; `saved` decays back to `idle` after
/// the configured display window.
pub struct SaveStatusTracker {
    core: Mutex<TrackerCore>,
    idle: Notify,
    saved_display_window: Duration,
}

impl SaveStatusTracker {
    pub fn new(saved_display_window: Duration) -> Self {
        Self {
            core: Mutex::new(TrackerCore {
                in_flight: 0,
                sticky_error: false,
                last_outcome: None,
                last_saved_instant: None,
                last_saved_time: None,
                entity_states: HashMap::new(),
            }),
            idle: Notify::new(),
            saved_display_window,
        }
    }

    pub fn op_started(&self) -> Result<()> {
        let mut core = self.core.lock()?;
        core.in_flight += 1;
        Ok(())
    }

    pub fn op_finished(&self, success: bool) -> Result<()> {
        let mut core = self.core.lock()?;
        core.in_flight = core.in_flight.saturating_sub(1);
        core.last_outcome = Some(success);
        core.sticky_error = !success;
        self.settle(&mut core);
        Ok(())
    }

    /// Completion of an operation whose outcome must not influence the
    /// indicator (a stale acknowledgment superseded by a newer write).
    pub fn op_finished_ignored(&self) -> Result<()> {
        let mut core = self.core.lock()?;
        core.in_flight = core.in_flight.saturating_sub(1);
        self.settle(&mut core);
        Ok(())
    }

    /// Records a failure that never became an in-flight operation, such as a
    /// malformed reorder permutation rejected locally.
    pub fn record_local_failure(&self) -> Result<()> {
        let mut core = self.core.lock()?;
        core.last_outcome = Some(false);
        core.sticky_error = true;
        Ok(())
    }

    fn settle(&self, core: &mut TrackerCore) {
        if core.in_flight == 0 {
            if core.last_outcome == Some(true) && !core.sticky_error {
                core.last_saved_instant = Some(Instant::now());
                core.last_saved_time = Some(Utc::now());
            }
            self.idle.notify_waiters();
        }
    }

    pub fn status(&self) -> Result<SaveStatus> {
        let core = self.core.lock()?;
        if core.in_flight > 0 {
            return Ok(SaveStatus::Saving);
        }
        if core.sticky_error {
            return Ok(SaveStatus::Error);
        }
        if let Some(saved_at) = core.last_saved_instant {
            if saved_at.elapsed() < self.saved_display_window {
                return Ok(SaveStatus::Saved);
            }
        }
        Ok(SaveStatus::Idle)
    }

    pub fn in_flight(&self) -> Result<usize> {
        Ok(self.core.lock()?.in_flight)
    }

    /// Clears a sticky error, returning the indicator to idle/saved.
    pub fn dismiss_error(&self) -> Result<()> {
        let mut core = self.core.lock()?;
        core.sticky_error = false;
        Ok(())
    }

    /// Wall-clock time of the last fully settled successful save.
    pub fn last_saved_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.core.lock()?.last_saved_time)
    }

    pub fn entity_state(&self, id: &EntityId) -> Result<EntityWriteState> {
        let core = self.core.lock()?;
        Ok(core
            .entity_states
            .get(id)
            .cloned()
            .unwrap_or(EntityWriteState::Clean))
    }

    pub fn set_entity_state(&self, id: EntityId, state: EntityWriteState) -> Result<()> {
        let mut core = self.core.lock()?;
        if state == EntityWriteState::Clean {
            core.entity_states.remove(&id);
        } else {
            core.entity_states.insert(id, state);
        }
        Ok(())
    }

    pub fn clear_entity(&self, id: &EntityId) -> Result<()> {
        let mut core = self.core.lock()?;
        core.entity_states.remove(id);
        Ok(())
    }

    /// Waits until no operation is in flight.
    pub async fn wait_idle(&self) -> Result<()> {
        loop {
            let notified = self.idle.notified();
            if self.core.lock()?.in_flight == 0 {
                return Ok(());
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SaveStatusTracker {
        SaveStatusTracker::new(Duration::from_secs(60))
    }

    #[test]
    fn test_idle_then_saving_then_saved() {
        let tracker = tracker();
        assert_eq!(tracker.status().unwrap(), SaveStatus::Idle);

        tracker.op_started().unwrap();
        assert_eq!(tracker.status().unwrap(), SaveStatus::Saving);

        tracker.op_finished(true).unwrap();
        assert_eq!(tracker.status().unwrap(), SaveStatus::Saved);
        assert!(tracker.last_saved_time().unwrap().is_some());
    }

    #[test]
    fn test_saved_decays_to_idle_after_display_window() {
        let tracker = SaveStatusTracker::new(Duration::ZERO);
        tracker.op_started().unwrap();
        tracker.op_finished(true).unwrap();
        // A zero-length display window decays immediately.
        assert_eq!(tracker.status().unwrap(), SaveStatus::Idle);
    }

    #[test]
    fn test_error_is_sticky_until_success() {
        let tracker = tracker();
        tracker.op_started().unwrap();
        tracker.op_finished(false).unwrap();
        assert_eq!(tracker.status().unwrap(), SaveStatus::Error);

        // A new operation shows saving, not error.
        tracker.op_started().unwrap();
        assert_eq!(tracker.status().unwrap(), SaveStatus::Saving);

        tracker.op_finished(true).unwrap();
        assert_eq!(tracker.status().unwrap(), SaveStatus::Saved);
    }

    #[test]
    fn test_error_dismissal() {
        let tracker = tracker();
        tracker.op_started().unwrap();
        tracker.op_finished(false).unwrap();
        assert_eq!(tracker.status().unwrap(), SaveStatus::Error);

        tracker.dismiss_error().unwrap();
        assert_eq!(tracker.status().unwrap(), SaveStatus::Idle);
    }

    #[test]
    fn test_ignored_completion_does_not_flip_outcome() {
        let tracker = tracker();
        tracker.op_started().unwrap();
        tracker.op_started().unwrap();
        tracker.op_finished(true).unwrap();
        assert_eq!(tracker.status().unwrap(), SaveStatus::Saving);

        // The stale completion settles the count without recording an outcome.
        tracker.op_finished_ignored().unwrap();
        assert_eq!(tracker.status().unwrap(), SaveStatus::Saved);
    }

    #[test]
    fn test_local_failure_surfaces_without_count() {
        let tracker = tracker();
        tracker.record_local_failure().unwrap();
        assert_eq!(tracker.status().unwrap(), SaveStatus::Error);
        assert_eq!(tracker.in_flight().unwrap(), 0);
    }

    #[test]
    fn test_entity_states() {
        let tracker = tracker();
        let id = EntityId::from("blk-1");
        assert_eq!(tracker.entity_state(&id).unwrap(), EntityWriteState::Clean);

        tracker
            .set_entity_state(id.clone(), EntityWriteState::Saving)
            .unwrap();
        assert_eq!(tracker.entity_state(&id).unwrap(), EntityWriteState::Saving);

        tracker.clear_entity(&id).unwrap();
        assert_eq!(tracker.entity_state(&id).unwrap(), EntityWriteState::Clean);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_once_settled() {
        let tracker = std::sync::Arc::new(tracker());
        tracker.op_started().unwrap();

        let waiter = {
            let tracker = std::sync::Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        tokio::task::yield_now().await;
        tracker.op_finished(true).unwrap();
        waiter.await.unwrap().unwrap();
    }
}
