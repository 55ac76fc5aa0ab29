/// A stream's lifecycle state.
///
/// Transitions are monotone except `Init -> Ready` (once a handshake
/// completes) and `_ -> Closing -> Closed`. Nothing ever goes backwards.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Init,
    Ready,
    Closing,
    Closed,
}

impl Status {
    /// Whether data should still be written through this layer. A layer
    /// mid-handshake (`Init`) must not have bytes pushed through it.
    pub fn is_ready(self) -> bool {
        matches!(self, Status::Ready)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Closing | Status::Closed)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Init
    }
}
