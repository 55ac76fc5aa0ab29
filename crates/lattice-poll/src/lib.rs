//! Single-threaded, non-blocking readiness multiplexer over [`Stream`]s.
//!
//! Tracks a set of registered streams keyed by [`Token`]; each [`wait`]
//! call re-arms write-interest for streams whose
//! [`Stream::has_outgoing_data`] state changed since the last call, then
//! polls once. After `wait` returns, drain readiness with
//! [`Poller::drain_ready`].

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use lattice_stream::Stream;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll};
use tracing::{error, warn};

pub use mio::Token;

/// Per-stream readiness reported after a [`wait`] call.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub incoming_ready: bool,
    pub outgoing_ready: bool,
}

/// Result of a single [`wait`] call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// At least one stream has readable or writable events.
    Operation,
    /// The timeout elapsed with nothing ready.
    Timeout,
    /// The underlying poll syscall was interrupted; callers should retry.
    Interrupt,
}

struct Entry<S> {
    token: Token,
    stream: S,
    writable_armed: bool,
}

/// Owns a set of registered streams and the `mio::Poll` instance backing
/// them. Streams must be deregistered (or dropped via
/// [`Poller::deregister`]) before their sockets close.
pub struct Poller<S: Stream> {
    poll: Poll,
    events: Events,
    entries: Vec<Entry<S>>,
    ready: Vec<(Token, Readiness)>,
    next_token: usize,
}

impl<S: Stream> Default for Poller<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Stream> Poller<S> {
    pub fn new() -> Self {
        Self {
            poll: Poll::new().expect("couldn't create a poll instance"),
            events: Events::with_capacity(256),
            entries: Vec::new(),
            ready: Vec::new(),
            next_token: 0,
        }
    }

    /// Registers `stream` for readable events (and, once it has outgoing
    /// data, writable events too) and returns its token.
    pub fn register(&mut self, stream: S) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;

        let fd = stream.fd();
        self.poll.registry().register(&mut SourceFd(&fd), token, Interest::READABLE)?;
        self.entries.push(Entry { token, stream, writable_armed: false });
        Ok(token)
    }

    /// Deregisters and returns the stream owned by `token`, if any.
    pub fn deregister(&mut self, token: Token) -> Option<S> {
        let index = self.entries.iter().position(|e| e.token == token)?;
        let entry = self.entries.swap_remove(index);
        let fd = entry.stream.fd();
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            warn!(?token, "poller: error deregistering fd: {e}");
        }
        Some(entry.stream)
    }

    pub fn get(&self, token: Token) -> Option<&S> {
        self.entries.iter().find(|e| e.token == token).map(|e| &e.stream)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut S> {
        self.entries.iter_mut().find(|e| e.token == token).map(|e| &mut e.stream)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Token, &mut S)> {
        self.entries.iter_mut().map(|e| (e.token, &mut e.stream))
    }

    fn rearm_write_interest(&mut self) {
        for entry in &mut self.entries {
            let want_writable = entry.stream.has_outgoing_data();
            if want_writable == entry.writable_armed {
                continue;
            }
            let interest = if want_writable { Interest::READABLE | Interest::WRITABLE } else { Interest::READABLE };
            let fd = entry.stream.fd();
            if let Err(e) = self.poll.registry().reregister(&mut SourceFd(&fd), entry.token, interest) {
                error!(token = ?entry.token, "poller: failed to re-arm write interest: {e}");
                continue;
            }
            entry.writable_armed = want_writable;
        }
    }

    /// Re-arms write interest where needed, polls once with `timeout`
    /// (`None` blocks indefinitely; `Some(Duration::ZERO)` never blocks),
    /// and records per-token readiness for [`Poller::drain_ready`].
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<WaitOutcome> {
        self.rearm_write_interest();
        self.ready.clear();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(WaitOutcome::Interrupt),
            Err(e) => return Err(e),
        }

        if self.events.is_empty() {
            return Ok(WaitOutcome::Timeout);
        }

        for event in self.events.iter() {
            self.ready.push((event.token(), Readiness { incoming_ready: event.is_readable(), outgoing_ready: event.is_writable() }));
        }
        Ok(WaitOutcome::Operation)
    }

    /// Drains the readiness recorded by the last [`wait`] call.
    pub fn drain_ready(&mut self) -> impl Iterator<Item = (Token, Readiness)> + '_ {
        self.ready.drain(..)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_stream::{FlushOutcome, RawStream, ReadOutcome, Status, StreamError};
    use std::net::TcpListener;

    struct DummyStream(RawStream);

    impl Stream for DummyStream {
        fn fd(&self) -> RawFd {
            self.0.fd()
        }
        fn status(&self) -> Status {
            self.0.status()
        }
        fn set_status(&mut self, status: Status) {
            self.0.set_status(status)
        }
        fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, StreamError> {
            self.0.read(dst)
        }
        fn write(&mut self, src: &[u8]) -> Result<usize, StreamError> {
            self.0.write(src)
        }
        fn flush(&mut self) -> Result<FlushOutcome, StreamError> {
            self.0.flush()
        }
        fn time(&mut self) -> Result<(), StreamError> {
            self.0.time()
        }
        fn has_outgoing_data(&self) -> bool {
            self.0.has_outgoing_data()
        }
    }

    fn loopback_pair() -> (RawStream, RawStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        server.set_nonblocking(true).unwrap();
        (RawStream::new(mio::net::TcpStream::from_std(server)), RawStream::new(mio::net::TcpStream::from_std(client)))
    }

    #[test]
    fn register_and_deregister_round_trip() {
        let (server, _client) = loopback_pair();
        let mut poller: Poller<DummyStream> = Poller::new();
        let token = poller.register(DummyStream(server)).unwrap();
        assert_eq!(poller.len(), 1);
        assert!(poller.deregister(token).is_some());
        assert!(poller.is_empty());
    }

    #[test]
    fn wait_reports_readable_once_data_arrives() {
        let (server, mut client) = loopback_pair();
        let mut poller: Poller<DummyStream> = Poller::new();
        let token = poller.register(DummyStream(server)).unwrap();

        client.write(b"hello").unwrap();
        client.flush().unwrap();

        let outcome = poller.wait(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(outcome, WaitOutcome::Operation);

        let ready: Vec<_> = poller.drain_ready().collect();
        assert!(ready.iter().any(|(t, r)| *t == token && r.incoming_ready));
    }
}
