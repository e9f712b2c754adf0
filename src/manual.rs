//! Hand-driven [`Clock`] and [`Timer`] implementations for deterministic tests.
//!
//! Time only moves when told to, and scheduled tasks only run when a test takes them from the
//! timer and polls them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::clock::{Clock, Timer};

/// A clock that reads as a fixed origin plus a settable offset in milliseconds.
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Jump to `ms` milliseconds past the origin. Moving backwards is allowed but breaks the
    /// monotonicity limiters expect.
    pub fn set_ms(&self, ms: u64) {
        self.offset_ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.offset_ms.load(Ordering::SeqCst)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

struct ScheduledTask {
    delay: Duration,
    task: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct Schedule {
    call_count: usize,
    last_delay: Option<Duration>,
    tasks: Vec<ScheduledTask>,
}

/// A timer that records what it was asked to schedule and never runs anything by itself.
///
/// Clones share the same schedule.
#[derive(Clone, Default)]
pub struct ManualTimer {
    schedule: Arc<Mutex<Schedule>>,
}

/// Returned by [`ManualTimer::after`]; numbers the calls starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualTimerHandle(pub usize);

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total number of `after` calls so far, fired or not.
    pub fn call_count(&self) -> usize {
        self.lock().call_count
    }

    /// Delay passed to the most recent `after` call.
    pub fn last_delay(&self) -> Option<Duration> {
        self.lock().last_delay
    }

    /// Number of scheduled tasks not yet taken.
    pub fn pending(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Remove the most recently scheduled task so the caller can run it.
    pub fn take_last(&self) -> Option<BoxFuture<'static, ()>> {
        self.lock().tasks.pop().map(|scheduled| scheduled.task)
    }

    /// Run the most recently scheduled task to completion, as if its delay had elapsed.
    /// Returns `false` if nothing was scheduled.
    pub async fn fire_last(&self) -> bool {
        // Taken before awaiting, so the task itself can schedule again.
        let Some(task) = self.take_last() else {
            return false;
        };
        task.await;
        true
    }
}

impl Timer for ManualTimer {
    type Handle = ManualTimerHandle;

    fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Self::Handle {
        let mut schedule = self.lock();
        schedule.call_count += 1;
        schedule.last_delay = Some(delay);
        schedule.tasks.push(ScheduledTask { delay, task });
        ManualTimerHandle(schedule.call_count)
    }
}

impl std::fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let schedule = self.lock();
        f.debug_struct("ManualTimer")
            .field("call_count", &schedule.call_count)
            .field(
                "pending_delays",
                &schedule.tasks.iter().map(|t| t.delay).collect::<Vec<_>>(),
            )
            .finish()
    }
}
