/// A counter bumped on every change to some guarded value.
///
/// Take a [`RevisionMark`] before suspending, and ask [`Revision::changed_since`] after resuming
/// to find out whether the value was replaced in between.
#[derive(Debug, Default)]
pub(crate) struct Revision(u64);

/// A snapshot of a [`Revision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RevisionMark(u64);

impl Revision {
    pub fn bump(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    pub fn mark(&self) -> RevisionMark {
        RevisionMark(self.0)
    }

    pub fn changed_since(&self, mark: RevisionMark) -> bool {
        self.0 != mark.0
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}
