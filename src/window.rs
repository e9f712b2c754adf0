use std::time::Duration;

use tokio::time::Instant;

/// What a cooldown window says about running right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The interval has passed since the last execution (or there never was one).
    Ready,
    /// Too soon; the remainder of the interval still to wait.
    Wait(Duration),
}

/// Tracks the last execution and measures the time left in the interval after it.
///
/// Never having executed behaves like an execution exactly one interval before construction, so
/// the first check is always `Ready`.
#[derive(Debug)]
pub(crate) struct CooldownWindow {
    interval: Duration,
    last: Option<Instant>,
}

impl CooldownWindow {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `Ready` is inclusive: exactly one interval after the last execution is admitted.
    pub fn admission(&self, now: Instant) -> Admission {
        let Some(last) = self.last else {
            return Admission::Ready;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= self.interval {
            Admission::Ready
        } else {
            Admission::Wait(self.interval - elapsed)
        }
    }

    pub fn record(&mut self, at: Instant) {
        self.last = Some(at);
    }
}
