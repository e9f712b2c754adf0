//! The two capabilities a limiter needs from the outside world: reading the current time, and
//! running a task once after a delay.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A monotonic, non-decreasing source of time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Schedules a task to run once, after at least `delay` has passed.
///
/// Implementations must not run the task inline from within `after`: limiters call it while
/// holding their own state lock.
pub trait Timer: Send + Sync + 'static {
    /// Opaque handle for a scheduled task. Limiters hold on to it while the task is pending but
    /// never inspect it.
    type Handle: Send + 'static;

    fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Self::Handle;
}

/// Reads time from tokio, so paused test time (`tokio::time::pause`) is respected.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Spawns each scheduled task onto the ambient tokio runtime.
///
/// # Panics
/// `after` panics if called outside of a tokio runtime, like `tokio::spawn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    type Handle = JoinHandle<()>;

    fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Self::Handle {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        })
    }
}
