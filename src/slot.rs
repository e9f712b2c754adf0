/// The single execution slot each limiter owns.
///
/// Anything other than `Idle` means new calls must not start an execution of their own.
#[derive(Debug)]
pub(crate) enum Slot<H> {
    Idle,
    /// A timer is pending; its handle is kept alive until it fires.
    Scheduled(H),
    /// The wrapped function is executing right now.
    Running,
}

impl<H> Slot<H> {
    pub fn is_idle(&self) -> bool {
        matches!(self, Slot::Idle)
    }

    pub fn state(&self) -> SlotState {
        match self {
            Slot::Idle => SlotState::Idle,
            Slot::Scheduled(_) => SlotState::Scheduled,
            Slot::Running => SlotState::Running,
        }
    }
}

/// Observable state of a limiter's execution slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing queued or executing; the next call is evaluated against the interval.
    Idle,
    /// An execution is queued on the timer. Calls made now are coalesced into it.
    Scheduled,
    /// The wrapped function is executing.
    Running,
}
