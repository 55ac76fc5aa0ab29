//! The non-blocking stream decoration contract.
//!
//! A raw socket stream ([`RawStream`]) may be wrapped into a TLS stream,
//! which in turn may be wrapped into a WebSocket or MQTT stream. Every
//! layer implements [`Stream`] and recurses into whatever it decorates
//! for the four core operations: `read`, `write`, `flush`, `time`.

mod error;
mod observer;
mod queue;
mod raw;
mod status;

pub use error::StreamError;
pub use observer::Observer;
pub use queue::OutgoingQueue;
pub use raw::RawStream;
pub use status::Status;

/// Outcome of a non-blocking `read`. Never `Data(0)` — a zero-byte
/// successful read is represented as `WouldBlock` by convention, mirroring
/// the base contract's "no blocking read returns a spurious zero".
#[derive(Debug)]
pub enum ReadOutcome {
    /// No data ready right now; try again later.
    WouldBlock,
    /// The peer closed cleanly.
    Eof,
    /// `n` bytes were copied into the caller's buffer.
    Data(usize),
}

/// Outcome of `flush`.
#[derive(Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The outgoing queue is empty.
    Done,
    /// The sink is full; bytes remain queued.
    WouldBlock,
}

/// The stream decoration contract every layer implements.
///
/// Implementers MUST preserve: `read` returns `WouldBlock` rather than
/// blocking, `Eof` on a clean peer close, and `Data(n)` on success;
/// `write` always reports success for the full length passed in (bytes
/// the sink can't accept immediately are queued, never dropped); `flush`
/// drains the outgoing queue before (for a decorator) flushing the layer
/// beneath it; `time` lets a layer do timer-driven work once per
/// scheduling tick and must propagate to the decorated layer afterwards.
pub trait Stream {
    /// The underlying leaf's raw file descriptor, found by walking the
    /// decoration chain.
    fn fd(&self) -> std::os::fd::RawFd;

    fn status(&self) -> Status;

    fn set_status(&mut self, status: Status);

    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, StreamError>;

    fn write(&mut self, src: &[u8]) -> Result<usize, StreamError>;

    fn flush(&mut self) -> Result<FlushOutcome, StreamError>;

    fn time(&mut self) -> Result<(), StreamError>;

    /// True iff this layer, or a decorated layer beneath it that has
    /// finished its own handshake, has bytes queued to send. A decorator
    /// must not report outgoing data belonging to a layer that is still
    /// mid-handshake: pushing bytes through an unready layer would
    /// corrupt its wire format.
    fn has_outgoing_data(&self) -> bool;
}

/// Combines this layer's own queue occupancy with a decorated layer's.
/// The own-queue contribution is gated on the decorated layer being
/// `Ready`: pushing bytes through a layer still mid-handshake would
/// corrupt its wire format. The decorated layer's own contribution is
/// **not** gated here and is always checked, because handshake bytes the
/// decorated layer queued for itself (e.g. a TLS ClientHello sitting in
/// the raw socket's queue while the TLS layer is still `Init`) must keep
/// being reported so the poller keeps arming writable interest until the
/// handshake flushes. Shared by every decorator crate so the gating rule
/// is applied identically everywhere.
pub fn has_outgoing_data_through(own_queue_nonempty: bool, decorated: &impl Stream) -> bool {
    (decorated.status().is_ready() && own_queue_nonempty) || decorated.has_outgoing_data()
}
