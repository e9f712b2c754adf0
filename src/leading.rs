//! Leading-edge limiting of an argument-less function.
//!
//! The first call after a quiet period runs the function straight away. A call that arrives
//! within the interval schedules one deferred run at the end of it, and every further call until
//! that run has finished is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, Timer, TokioClock, TokioTimer};
use crate::config::RateLimitConfig;
use crate::slot::{Slot, SlotState};
use crate::window::{Admission, CooldownWindow};

type Action = Box<dyn Fn() + Send + Sync>;

struct LeadingState<H> {
    window: CooldownWindow,
    slot: Slot<H>,
}

struct Inner<C: Clock, T: Timer> {
    action: Action,
    clock: C,
    timer: T,
    state: Mutex<LeadingState<T::Handle>>,
}

/// Wraps `f` so that it runs at most once per interval, immediately when it can.
///
/// Cloning gives another handle to the same limiter.
pub struct LeadingRateLimiter<C: Clock = TokioClock, T: Timer = TokioTimer> {
    inner: Arc<Inner<C, T>>,
}

impl<C: Clock, T: Timer> Clone for LeadingRateLimiter<C, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl LeadingRateLimiter {
    /// Build a limiter driven by the tokio clock and timer.
    ///
    /// Deferred runs are spawned onto the tokio runtime, so `trigger` must be called from within
    /// one whenever it might need to defer.
    pub fn new<F>(interval: Duration, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_clock_and_timer(interval, f, TokioClock, TokioTimer)
    }

    pub fn from_config<F>(config: &RateLimitConfig, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new(config.interval(), f)
    }
}

impl<C: Clock, T: Timer> LeadingRateLimiter<C, T> {
    pub fn with_clock_and_timer<F>(interval: Duration, f: F, clock: C, timer: T) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                action: Box::new(f),
                clock,
                timer,
                state: Mutex::new(LeadingState {
                    window: CooldownWindow::new(interval),
                    slot: Slot::Idle,
                }),
            }),
        }
    }

    /// Request a run of the wrapped function.
    ///
    /// Runs it synchronously if a full interval has passed since the last run, otherwise
    /// schedules a run for when the interval is up. Dropped if a run is already scheduled or
    /// executing.
    ///
    /// # Panics
    /// A panic in the wrapped function propagates out of an immediate run.
    pub fn trigger(&self) {
        let mut state = self.inner.lock();
        if !state.slot.is_idle() {
            trace!("run already pending, dropping trigger");
            return;
        }

        let now = self.inner.clock.now();
        match state.window.admission(now) {
            Admission::Ready => {
                state.window.record(now);
                drop(state);
                (self.inner.action)();
            }
            Admission::Wait(delay) => {
                debug!(?delay, "deferring run");
                let inner = Arc::clone(&self.inner);
                let handle = self
                    .inner
                    .timer
                    .after(delay, async move { inner.fire() }.boxed());
                state.slot = Slot::Scheduled(handle);
            }
        }
    }

    pub fn state(&self) -> SlotState {
        self.inner.lock().slot.state()
    }

    pub fn interval(&self) -> Duration {
        self.inner.lock().window.interval()
    }
}

impl<C: Clock, T: Timer> Inner<C, T> {
    fn lock(&self) -> MutexGuard<'_, LeadingState<T::Handle>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The deferred run, executed by the timer.
    fn fire(&self) {
        self.lock().slot = Slot::Running;

        let guard = ReleaseOnUnwind { inner: self };
        (self.action)();
        std::mem::forget(guard);

        let now = self.clock.now();
        let mut state = self.lock();
        state.window.record(now);
        state.slot = Slot::Idle;
    }
}

/// Frees the slot if the wrapped function panics during a deferred run, so later triggers are
/// not dropped forever.
struct ReleaseOnUnwind<'a, C: Clock, T: Timer> {
    inner: &'a Inner<C, T>,
}

impl<C: Clock, T: Timer> Drop for ReleaseOnUnwind<'_, C, T> {
    fn drop(&mut self) {
        warn!("deferred run did not complete, releasing slot");
        self.inner.lock().slot = Slot::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manual::{ManualClock, ManualTimer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::executor::block_on;

    #[test]
    fn test_deferred_panic_releases_slot() {
        let clock = ManualClock::new();
        let timer = ManualTimer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let limiter = {
            let calls = Arc::clone(&calls);
            LeadingRateLimiter::with_clock_and_timer(
                Duration::from_millis(100),
                move || {
                    if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                        panic!("second run fails");
                    }
                },
                clock.clone(),
                timer.clone(),
            )
        };

        limiter.trigger();
        clock.advance(Duration::from_millis(10));
        limiter.trigger();
        assert_eq!(limiter.state(), SlotState::Scheduled);

        let task = timer.take_last().unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| block_on(task)));
        assert!(outcome.is_err());
        assert_eq!(limiter.state(), SlotState::Idle);

        // The failed run never recorded a time, so the next trigger is measured from the first.
        clock.advance(Duration::from_millis(90));
        limiter.trigger();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(timer.call_count(), 1);
    }
}
