// ============================================================================
// Debounce Scheduler
// ============================================================================
//
// The only cancellable unit of work in the engine is a not-yet-fired debounce
// timer. The capability is injected rather than baked into the coordinator so
// tests can drive time by hand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Callback invoked when a scheduled timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle to a scheduled, not-yet-fired timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// A "schedule later, cancel if superseded" capability.
///
/// Cancelling a handle whose timer already fired (or was never known) is a
/// no-op; callers race timer expiry by design.
pub trait Scheduler: Send + Sync + 'static {
    /// Schedules `callback` to run once after `delay`.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    /// Cancels a pending timer. The callback will not run.
    fn cancel(&self, handle: &TimerHandle);
}

// ----------------------------------------------------------------------------
// Tokio-backed scheduler (production)
// ----------------------------------------------------------------------------

/// Production scheduler: one tokio task per pending timer.
///
/// Must be used from within a tokio runtime. A fired timer removes its own
/// bookkeeping entry; `cancel` aborts the sleeping task.
pub struct TokioScheduler {
    tasks: Arc<Mutex<HashMap<u64, tokio::task::JoinHandle<()>>>>,
    next_id: AtomicU64,
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of timers scheduled and not yet fired or cancelled.
    pub fn pending_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            callback();
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);
        TimerHandle(id)
    }

    fn cancel(&self, handle: &TimerHandle) {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0);
        if let Some(task) = task {
            task.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Manually-advanced scheduler (tests)
// ----------------------------------------------------------------------------

struct ManualEntry {
    id: u64,
    due_at: Duration,
    callback: TimerCallback,
}

/// Deterministic scheduler driven by explicit `advance` calls.
///
/// Time starts at zero and only moves when told to; due callbacks run
/// synchronously inside `advance`, in deadline order.
pub struct ManualScheduler {
    state: Mutex<ManualState>,
    next_id: AtomicU64,
}

struct ManualState {
    now: Duration,
    entries: Vec<ManualEntry>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Duration::ZERO,
                entries: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Advances virtual time, firing every timer that comes due.
    ///
    /// Callbacks run outside the internal lock, so a callback may schedule
    /// follow-up timers; those only fire on a later `advance`.
    pub fn advance(&self, delta: Duration) {
        let due = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.now += delta;
            let now = state.now;
            let mut due: Vec<ManualEntry> = Vec::new();
            let mut remaining: Vec<ManualEntry> = Vec::new();
            for entry in state.entries.drain(..) {
                if entry.due_at <= now {
                    due.push(entry);
                } else {
                    remaining.push(entry);
                }
            }
            state.entries = remaining;
            due.sort_by_key(|entry| (entry.due_at, entry.id));
            due
        };

        for entry in due {
            (entry.callback)();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let due_at = state.now + delay;
        state.entries.push(ManualEntry {
            id,
            due_at,
            callback,
        });
        TimerHandle(id)
    }

    fn cancel(&self, handle: &TimerHandle) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.retain(|entry| entry.id != handle.0);
    }
}
