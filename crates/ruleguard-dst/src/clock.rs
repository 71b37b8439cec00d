//! Deterministic clock for simulation
//!
//! TigerStyle: Explicit time control, no system time dependencies.
//!
//! Time moves only through `advance`. Timers due at or before the new time
//! fire synchronously on the caller's thread, earliest deadline first, with
//! ties broken by registration order. A callback that schedules an already
//! due timer sees it fire within the same `advance`.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default start time: 2024-01-01T00:00:00Z
pub const CLOCK_START_MS_DEFAULT: u64 = 1_704_067_200_000;

/// Upper bound on timers fired by one `advance`, catches callbacks that
/// reschedule themselves with zero delay forever
pub const CLOCK_TIMERS_FIRED_PER_ADVANCE_MAX: usize = 1_000_000;

/// Callback run when a timer fires
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Identifier of a registered timer, unique per clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// A timer that fired during `advance`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: TimerId,
    pub deadline_ms: u64,
}

struct PendingTimer {
    callback: Option<TimerCallback>,
    fired: Arc<AtomicBool>,
}

struct ClockState {
    now_ms: u64,
    next_timer_id: u64,
    /// Keyed by (deadline, id) so iteration order is firing order
    pending: BTreeMap<(u64, u64), PendingTimer>,
}

/// Deterministic simulation clock with timers
///
/// Clones share the same time and timer set.
#[derive(Clone)]
pub struct VirtualClock {
    state: Arc<Mutex<ClockState>>,
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("VirtualClock")
            .field("now_ms", &state.now_ms)
            .field("pending_timers", &state.pending.len())
            .finish()
    }
}

impl VirtualClock {
    /// Create a new clock starting at the given time
    ///
    /// Times before the epoch clamp to the epoch.
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self::from_millis(from_datetime(start_time))
    }

    /// Create a new clock starting at a specific millisecond timestamp
    pub fn from_millis(ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                now_ms: ms,
                next_timer_id: 0,
                pending: BTreeMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the current time
    ///
    /// Times past chrono's range saturate at `DateTime::<Utc>::MAX_UTC`.
    pub fn now(&self) -> DateTime<Utc> {
        to_datetime(self.now_ms())
    }

    /// Get the current time in milliseconds since epoch
    pub fn now_ms(&self) -> u64 {
        self.lock().now_ms
    }

    /// Register a timer with no callback
    ///
    /// Poll the handle with `has_fired`.
    pub fn after(&self, delay: Duration) -> TimerHandle {
        self.register(delay, None)
    }

    /// Register a callback to run once `delay` has elapsed
    pub fn after_fn(
        &self,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> TimerHandle {
        self.register(delay, Some(Box::new(callback)))
    }

    fn register(&self, delay: Duration, callback: Option<TimerCallback>) -> TimerHandle {
        let mut state = self.lock();
        let deadline_ms = state.now_ms.saturating_add(duration_ms(delay));
        let id = state.next_timer_id;
        state.next_timer_id += 1;

        let fired = Arc::new(AtomicBool::new(false));
        state.pending.insert(
            (deadline_ms, id),
            PendingTimer {
                callback,
                fired: fired.clone(),
            },
        );

        TimerHandle {
            id: TimerId(id),
            deadline_ms,
            fired,
            clock: self.clone(),
        }
    }

    /// Advance time and fire every timer that became due
    ///
    /// Returns the fired timers in firing order.
    pub fn advance(&self, duration: Duration) -> Vec<FiredTimer> {
        let now_ms = {
            let mut state = self.lock();
            state.now_ms = state.now_ms.saturating_add(duration_ms(duration));
            state.now_ms
        };

        let mut fired = Vec::new();
        loop {
            // Pop under the lock, run the callback without it.
            let next = {
                let mut state = self.lock();
                let due = matches!(
                    state.pending.keys().next(),
                    Some(&(deadline_ms, _)) if deadline_ms <= now_ms
                );
                if due {
                    state.pending.pop_first()
                } else {
                    None
                }
            };
            let Some(((deadline_ms, id), timer)) = next else {
                break;
            };

            assert!(
                fired.len() < CLOCK_TIMERS_FIRED_PER_ADVANCE_MAX,
                "more than {} timers fired in one advance",
                CLOCK_TIMERS_FIRED_PER_ADVANCE_MAX
            );

            timer.fired.store(true, Ordering::SeqCst);
            if let Some(callback) = timer.callback {
                callback();
            }
            fired.push(FiredTimer {
                id: TimerId(id),
                deadline_ms,
            });
        }
        fired
    }

    /// Advance time by the given number of milliseconds
    pub fn advance_ms(&self, ms: u64) -> Vec<FiredTimer> {
        self.advance(Duration::from_millis(ms))
    }

    /// Same as `advance`; there is nothing to block on in simulated time
    pub fn sleep(&self, duration: Duration) -> Vec<FiredTimer> {
        self.advance(duration)
    }

    /// Set the current time and discard all pending timers
    ///
    /// Discarded timers never fire and their handles report not pending.
    pub fn reset(&self, time: DateTime<Utc>) {
        self.reset_ms(from_datetime(time));
    }

    /// `reset` at a millisecond timestamp
    pub fn reset_ms(&self, now_ms: u64) {
        let mut state = self.lock();
        state.now_ms = now_ms;
        state.pending.clear();
    }

    /// Number of timers waiting to fire
    pub fn pending_timers(&self) -> usize {
        self.lock().pending.len()
    }

    /// Deadline of the next timer to fire
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.lock().pending.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Check if a deadline (in ms) has passed
    pub fn is_past_ms(&self, deadline_ms: u64) -> bool {
        self.now_ms() >= deadline_ms
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::from_millis(CLOCK_START_MS_DEFAULT)
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn from_datetime(time: DateTime<Utc>) -> u64 {
    u64::try_from(time.timestamp_millis()).unwrap_or(0)
}

fn to_datetime(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Handle to a registered timer
pub struct TimerHandle {
    id: TimerId,
    deadline_ms: u64,
    fired: Arc<AtomicBool>,
    clock: VirtualClock,
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("deadline_ms", &self.deadline_ms)
            .field("fired", &self.has_fired())
            .finish()
    }
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn deadline_ms(&self) -> u64 {
        self.deadline_ms
    }

    /// Whether the timer has fired
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Whether the timer will still fire
    pub fn is_pending(&self) -> bool {
        self.clock
            .lock()
            .pending
            .contains_key(&(self.deadline_ms, self.id.0))
    }

    /// Cancel the timer
    ///
    /// Returns true only if this call stopped a pending timer. Cancelling a
    /// fired, discarded or already cancelled timer returns false.
    pub fn cancel(&self) -> bool {
        self.clock
            .lock()
            .pending
            .remove(&(self.deadline_ms, self.id.0))
            .is_some()
    }

    /// Alias of `cancel`
    pub fn stop(&self) -> bool {
        self.cancel()
    }
}
