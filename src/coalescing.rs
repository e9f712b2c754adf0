//! Trailing-edge limiting of an async function, forwarding only the latest parameters.
//!
//! Every submission replaces the parameters the next execution will use. Executions are spaced
//! by at least the interval, measured from the *completion* of one to the start of the next, and
//! at most one execution is queued or in flight at a time. Results go to a callback rather than
//! back to the submitter, since a submission may never be executed with its own parameters.
//!
//! The subtle case is a submission that arrives while the wrapped function is still running. It
//! must not start a second, concurrent execution, but its parameters must not be lost either:
//! the running execution notices the newer parameters when it completes and schedules a
//! follow-up one full interval later.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, Timer, TokioClock, TokioTimer};
use crate::config::RateLimitConfig;
use crate::revision::{Revision, RevisionMark};
use crate::slot::{Slot, SlotState};
use crate::window::{Admission, CooldownWindow};

type Call<P, R> = Box<dyn Fn(P) -> BoxFuture<'static, R> + Send + Sync>;
type Deliver<R> = Box<dyn Fn(R) + Send + Sync>;

struct CoalescingState<P, H> {
    window: CooldownWindow,
    slot: Slot<H>,
    latest: Option<P>,
    revision: Revision,
}

struct Inner<P, R, C: Clock, T: Timer> {
    call: Call<P, R>,
    deliver: Deliver<R>,
    clock: C,
    timer: T,
    state: Mutex<CoalescingState<P, T::Handle>>,
}

/// Wraps an async `f(params) -> R`, running it at most once per interval with the most recently
/// submitted parameters and handing each result to `on_result`.
///
/// Cloning gives another handle to the same limiter.
pub struct CoalescingAsyncRateLimiter<P, R, C: Clock = TokioClock, T: Timer = TokioTimer> {
    inner: Arc<Inner<P, R, C, T>>,
}

impl<P, R, C: Clock, T: Timer> Clone for CoalescingAsyncRateLimiter<P, R, C, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, R> CoalescingAsyncRateLimiter<P, R>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Build a limiter driven by the tokio clock and timer.
    ///
    /// Deferred executions are spawned onto the tokio runtime, so `submit` must be called from
    /// within one.
    pub fn new<F, Fut, G>(interval: Duration, f: F, on_result: G) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        G: Fn(R) + Send + Sync + 'static,
    {
        Self::with_clock_and_timer(interval, f, on_result, TokioClock, TokioTimer)
    }

    pub fn from_config<F, Fut, G>(config: &RateLimitConfig, f: F, on_result: G) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        G: Fn(R) + Send + Sync + 'static,
    {
        Self::new(config.interval(), f, on_result)
    }
}

impl<P, R, C, T> CoalescingAsyncRateLimiter<P, R, C, T>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
    C: Clock,
    T: Timer,
{
    pub fn with_clock_and_timer<F, Fut, G>(
        interval: Duration,
        f: F,
        on_result: G,
        clock: C,
        timer: T,
    ) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        G: Fn(R) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                call: Box::new(move |params: P| f(params).boxed()),
                deliver: Box::new(on_result),
                clock,
                timer,
                state: Mutex::new(CoalescingState {
                    window: CooldownWindow::new(interval),
                    slot: Slot::Idle,
                    latest: None,
                    revision: Revision::default(),
                }),
            }),
        }
    }

    /// Submit parameters for the wrapped function.
    ///
    /// If the limiter is idle and a full interval has passed since the last execution completed,
    /// the function runs now and this future resolves once its result has been delivered.
    /// Otherwise the parameters are stored for the queued (or in-flight) execution to pick up,
    /// and this future resolves without waiting for it.
    ///
    /// Dropping this future while it runs the function abandons that execution. The limiter is
    /// freed, or, if newer parameters were submitted meanwhile, a follow-up is scheduled for them
    /// one interval later.
    pub async fn submit(&self, params: P) {
        {
            let mut state = self.inner.lock();
            state.latest = Some(params);
            state.revision.bump();

            if !state.slot.is_idle() {
                trace!(
                    revision = state.revision.value(),
                    "execution pending, coalescing parameters"
                );
                return;
            }

            let now = self.inner.clock.now();
            match state.window.admission(now) {
                Admission::Ready => {
                    // Claimed before the first suspension, so concurrent submissions back off.
                    state.slot = Slot::Running;
                }
                Admission::Wait(delay) => {
                    debug!(?delay, "deferring execution");
                    let task = Arc::clone(&self.inner).run_once();
                    state.slot = Slot::Scheduled(self.inner.timer.after(delay, task));
                    return;
                }
            }
        }

        Arc::clone(&self.inner).run_once().await;
    }

    pub fn state(&self) -> SlotState {
        self.inner.lock().slot.state()
    }

    pub fn interval(&self) -> Duration {
        self.inner.lock().window.interval()
    }
}

impl<P, R, C, T> Inner<P, R, C, T>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
    C: Clock,
    T: Timer,
{
    fn lock(&self) -> MutexGuard<'_, CoalescingState<P, T::Handle>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One execution with whatever parameters are latest at the time it starts.
    fn run_once(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            let (issued, params) = {
                let mut state = self.lock();
                state.slot = Slot::Running;
                (state.revision.mark(), state.latest.clone())
            };
            let Some(params) = params else {
                self.lock().slot = Slot::Idle;
                return;
            };

            let guard = ReleaseOnAbandon {
                inner: Arc::clone(&self),
                issued,
                armed: true,
            };
            let result = (self.call)(params).await;
            (self.deliver)(result);
            guard.disarm();

            let now = self.clock.now();
            let mut state = self.lock();
            state.window.record(now);
            self.settle(&mut state, issued);
        }
        .boxed()
    }

    /// Leave the slot after an execution: scheduled again if newer parameters arrived since
    /// `issued` was taken, idle otherwise.
    fn settle(
        self: &Arc<Self>,
        state: &mut CoalescingState<P, T::Handle>,
        issued: RevisionMark,
    ) {
        if state.revision.changed_since(issued) {
            // They get a full interval, however long the execution took.
            let interval = state.window.interval();
            debug!(
                delay = ?interval,
                revision = state.revision.value(),
                "parameters changed during execution, scheduling follow-up"
            );
            let task = Arc::clone(self).run_once();
            state.slot = Slot::Scheduled(self.timer.after(interval, task));
        } else {
            state.slot = Slot::Idle;
        }
    }
}

/// Settles the slot if an execution is dropped mid-flight or unwinds, so the limiter does not
/// stay `Running` forever. Parameters submitted during the execution still get their follow-up.
/// The completion time is left as it was.
struct ReleaseOnAbandon<P, R, C, T>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
    C: Clock,
    T: Timer,
{
    inner: Arc<Inner<P, R, C, T>>,
    issued: RevisionMark,
    armed: bool,
}

impl<P, R, C, T> ReleaseOnAbandon<P, R, C, T>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
    C: Clock,
    T: Timer,
{
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<P, R, C, T> Drop for ReleaseOnAbandon<P, R, C, T>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
    C: Clock,
    T: Timer,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("execution abandoned before completion, releasing slot");
        let mut state = self.inner.lock();
        self.inner.settle(&mut state, self.issued);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manual::{ManualClock, ManualTimer};
    use pretty_assertions::assert_eq;

    use futures::poll;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_dropped_submit_settles_slot() {
        let clock = ManualClock::new();
        let timer = ManualTimer::new();
        let gate = Arc::new(Notify::new());
        let results = Arc::new(Mutex::new(vec![]));

        let limiter = {
            let gate = Arc::clone(&gate);
            let results = Arc::clone(&results);
            CoalescingAsyncRateLimiter::with_clock_and_timer(
                Duration::from_millis(100),
                move |params: u32| {
                    let gate = Arc::clone(&gate);
                    async move {
                        if params == 1 {
                            gate.notified().await;
                        }
                        params * 10
                    }
                },
                move |result: u32| results.lock().unwrap().push(result),
                clock.clone(),
                timer.clone(),
            )
        };

        // Abandoned with nothing newer submitted: straight back to idle.
        {
            let mut stalled = limiter.submit(1).boxed();
            assert!(poll!(&mut stalled).is_pending());
            assert_eq!(limiter.state(), SlotState::Running);
        }
        assert_eq!(limiter.state(), SlotState::Idle);
        assert_eq!(timer.call_count(), 0);

        // Abandoned after another submission: that one still gets its follow-up.
        {
            let mut stalled = limiter.submit(1).boxed();
            assert!(poll!(&mut stalled).is_pending());

            limiter.submit(2).await;
            assert_eq!(limiter.state(), SlotState::Running);
        }
        assert_eq!(limiter.state(), SlotState::Scheduled);
        assert_eq!(timer.call_count(), 1);
        assert_eq!(timer.last_delay(), Some(Duration::from_millis(100)));
        assert!(results.lock().unwrap().is_empty());

        assert!(timer.fire_last().await);
        assert_eq!(*results.lock().unwrap(), vec![20]);
        assert_eq!(limiter.state(), SlotState::Idle);
    }
}
