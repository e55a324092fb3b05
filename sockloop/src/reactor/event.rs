/// Readiness reported by the poller for one polled handle.
///
/// The poller emits exactly one `Event` per source it was given, in the
/// order the sources were supplied, even when nothing is ready. The reactor
/// relies on this to advance connect timers once per tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Event {
    /// Position of the source in the query built for this tick.
    pub(crate) token: usize,

    /// Data (or a pending connection) can be received.
    pub(crate) readable: bool,

    /// The handle accepts more outbound bytes.
    pub(crate) writable: bool,

    /// Error, hang-up or invalid-handle condition.
    pub(crate) error: bool,
}

impl Event {
    /// Returns an event with no readiness for `token`.
    pub(crate) fn empty(token: usize) -> Self {
        Self {
            token,
            ..Self::default()
        }
    }

    /// Returns `true` if any readiness bit is set.
    pub(crate) fn is_ready(&self) -> bool {
        self.readable || self.writable || self.error
    }
}
