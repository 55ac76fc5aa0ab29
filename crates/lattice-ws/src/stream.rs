use std::collections::VecDeque;
use std::time::Duration;

use lattice_buffer::Buffer;
use lattice_http::{MsgBuilder, MsgView};
use lattice_stream::{has_outgoing_data_through, FlushOutcome, ReadOutcome, Status, Stream, StreamError};
use lattice_time::{Clock, TimeBase, Timer};
use tracing::warn;

use crate::codec::{self, CloseCode, Opcode, ParseOutcome};

const MESSAGE_BUFFER_SIZE: usize = 4096;
const KEEP_ALIVE_SERVER_TIMEOUT: u64 = 100;
const KEEP_ALIVE_CLIENT_TIMEOUT: u64 = 90;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

/// Outcome of [`WsStream::read_frame`].
#[derive(Debug)]
pub enum FrameRead {
    /// No complete reassembled message is queued right now.
    WouldBlock,
    /// The decorated stream reported EOF.
    Eof,
    /// A complete message of `len` bytes was copied into the caller's
    /// buffer and popped off the queue.
    Frame { opcode: Opcode, len: usize },
}

struct PendingMessage {
    opcode: Opcode,
    buffer: Buffer,
    fin: bool,
}

/// Decorates a byte stream with RFC 6455 WebSocket framing.
///
/// Writes are masked when this side is the client and left unmasked when
/// it is the server, per RFC 6455 §5.1; a masked frame received by a
/// client closes the connection with [`CloseCode::ProtocolError`], since
/// only servers may send unmasked frames to a client.
pub struct WsStream<S: Stream> {
    decorated: S,
    status: Status,
    inbuf: Buffer,
    queue: VecDeque<PendingMessage>,
    role: Role,
    data_type: Opcode,
    key: Option<String>,
    clock: Clock,
    keep_alive_timer: Timer,
    keep_alive_timeout: u64,
    keep_alive_responded: bool,
}

impl<S: Stream> WsStream<S> {
    /// Wraps `decorated` as the server side of a handshake that has not
    /// yet been received.
    pub fn new_server(decorated: S, clock: Clock) -> Self {
        Self::new(decorated, Role::Server, clock)
    }

    /// Wraps `decorated` as the client side; call [`connect`](Self::connect)
    /// to send the handshake request.
    pub fn new_client(decorated: S, clock: Clock) -> Self {
        Self::new(decorated, Role::Client, clock)
    }

    fn new(decorated: S, role: Role, clock: Clock) -> Self {
        Self {
            decorated,
            status: Status::Init,
            inbuf: Buffer::with_capacity(MESSAGE_BUFFER_SIZE),
            queue: VecDeque::new(),
            role,
            data_type: Opcode::Binary,
            key: None,
            clock,
            keep_alive_timer: Timer::new(TimeBase::Seconds),
            keep_alive_timeout: 0,
            keep_alive_responded: true,
        }
    }

    /// Sets the opcode used for outgoing `write` calls (`Text` or
    /// `Binary`); defaults to `Binary`.
    pub fn set_data_type(&mut self, opcode: Opcode) {
        self.data_type = opcode;
    }

    /// Sends the upgrade request. `key` overrides the generated
    /// `Sec-WebSocket-Key` (mostly useful for tests); `extra_headers` are
    /// appended verbatim, e.g. for `Host` or subprotocol negotiation.
    pub fn connect(&mut self, uri: &str, key: Option<&str>, extra_headers: &[(&str, &str)]) -> Result<(), StreamError> {
        self.role = Role::Client;
        let key = key.map(str::to_string).unwrap_or_else(codec::generate_key);

        let mut builder = MsgBuilder::request("GET", uri, "HTTP/1.1")
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", &key);
        for (name, value) in extra_headers {
            builder = builder.header(name, value);
        }
        self.key = Some(key);

        let request = builder.build();
        self.decorated.write(&request)?;
        Ok(())
    }

    /// Sends a CLOSE frame and marks this stream as closing. A received
    /// CLOSE is never reciprocated; closure is instead observed through
    /// the decorated transport reporting EOF.
    pub fn disconnect(&mut self, code: CloseCode) -> Result<(), StreamError> {
        let payload = (code as u16).to_be_bytes();
        let mask = self.outgoing_mask();
        let frame = codec::format_frame(Opcode::Close, true, mask, &payload);
        self.decorated.write(&frame)?;
        self.status = Status::Closing;
        Ok(())
    }

    fn outgoing_mask(&self) -> Option<[u8; 4]> {
        match self.role {
            Role::Client => Some(codec::generate_mask()),
            Role::Server => None,
        }
    }

    fn handle_handshake_request(&mut self) -> Result<(), StreamError> {
        let Ok(text) = core::str::from_utf8(self.inbuf.as_slice()) else { return Ok(()) };
        let Some(view) = MsgView::parse_request(text) else { return Ok(()) };

        let Some(key) = view.header("Sec-WebSocket-Key") else {
            warn!("websocket handshake request missing Sec-WebSocket-Key");
            self.inbuf.reset();
            self.status = Status::Closing;
            return Ok(());
        };
        let accept = codec::calculate_accept_key(key.trim());
        let response = MsgBuilder::response("HTTP/1.1", 101, "Switching Protocols")
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Accept", &accept)
            .build();

        self.inbuf.reset();
        self.decorated.write(&response)?;
        self.status = Status::Ready;
        self.keep_alive_timeout = KEEP_ALIVE_SERVER_TIMEOUT;
        self.keep_alive_timer.start(&self.clock, Duration::from_secs(self.keep_alive_timeout));
        Ok(())
    }

    fn handle_handshake_response(&mut self) -> Result<(), StreamError> {
        let Ok(text) = core::str::from_utf8(self.inbuf.as_slice()) else { return Ok(()) };
        let Some(view) = MsgView::parse_response(text) else { return Ok(()) };

        let Some(sent_key) = self.key.clone() else {
            warn!("websocket handshake response received without a pending request");
            self.inbuf.reset();
            self.status = Status::Closing;
            return Ok(());
        };
        let Some(accept) = view.header("Sec-WebSocket-Accept") else {
            warn!("websocket handshake response missing Sec-WebSocket-Accept");
            self.inbuf.reset();
            self.status = Status::Closing;
            return Ok(());
        };

        let expected = codec::calculate_accept_key(&sent_key);
        if expected != accept.trim() {
            warn!("websocket Sec-WebSocket-Accept verification failed");
            self.inbuf.reset();
            self.status = Status::Closing;
            return Ok(());
        }

        self.inbuf.reset();
        self.key = None;
        self.status = Status::Ready;
        self.keep_alive_timeout = KEEP_ALIVE_CLIENT_TIMEOUT;
        self.keep_alive_timer.start(&self.clock, Duration::from_secs(self.keep_alive_timeout));
        Ok(())
    }

    /// Reads whatever is available from the decorated stream, feeding it
    /// through the handshake or the frame parser. Returns whether the
    /// decorated stream reported EOF.
    fn pump(&mut self) -> Result<bool, StreamError> {
        let mut scratch = [0u8; MESSAGE_BUFFER_SIZE];
        loop {
            match self.decorated.read(&mut scratch)? {
                ReadOutcome::WouldBlock => return Ok(false),
                ReadOutcome::Eof => return Ok(true),
                ReadOutcome::Data(n) => {
                    self.inbuf.append(&scratch[..n]);
                    if !self.status.is_ready() {
                        match self.role {
                            Role::Client => self.handle_handshake_response()?,
                            Role::Server => self.handle_handshake_request()?,
                        }
                    } else {
                        self.drain_frames()?;
                    }
                }
            }
        }
    }

    fn drain_frames(&mut self) -> Result<(), StreamError> {
        loop {
            let (fin, opcode, mask, payload, frame_len) = match codec::parse_frame(self.inbuf.as_slice()) {
                ParseOutcome::NeedMore(usize::MAX) => {
                    warn!("websocket: unknown opcode, closing");
                    self.status = Status::Closing;
                    return Ok(());
                }
                ParseOutcome::NeedMore(_) => return Ok(()),
                ParseOutcome::Frame(frame) => {
                    (frame.fin, frame.opcode, frame.mask, frame.payload.to_vec(), frame.frame_len)
                }
            };
            self.handle_frame(fin, opcode, mask, payload)?;
            self.inbuf.cut(frame_len);
        }
    }

    fn handle_frame(&mut self, fin: bool, opcode: Opcode, mask: Option<[u8; 4]>, mut payload: Vec<u8>) -> Result<(), StreamError> {
        if let Some(mask) = mask {
            if self.role == Role::Client {
                warn!("websocket client received a masked frame, closing");
                return self.disconnect(CloseCode::ProtocolError);
            }
            codec::apply_mask(&mut payload, mask);
        }

        match opcode {
            Opcode::Text | Opcode::Binary => {
                // Remembered as the default type for subsequent outgoing writes.
                self.data_type = opcode;
                let mut buffer = Buffer::new();
                buffer.append(&payload);
                self.queue.push_back(PendingMessage { opcode, buffer, fin });
            }
            Opcode::Continue => {
                if let Some(last) = self.queue.back_mut() {
                    last.buffer.append(&payload);
                    last.fin = fin;
                }
            }
            Opcode::Close => {}
            Opcode::Ping => {
                let mask = self.outgoing_mask();
                let frame = codec::format_frame(Opcode::Pong, true, mask, &payload);
                self.decorated.write(&frame)?;
                self.keep_alive_timer.restart(&self.clock);
            }
            Opcode::Pong => {
                self.keep_alive_responded = true;
            }
        }
        Ok(())
    }

    /// Pops the next complete reassembled message into `dst`, waiting for
    /// every fragment of it (unlike [`read`](Stream::read), which streams
    /// bytes out of a fragment chain's head slice regardless of whether
    /// the chain is finished). Errors with `StreamError::BufferTooSmall`
    /// without consuming the slice if `dst` isn't big enough to hold it.
    pub fn read_frame(&mut self, dst: &mut [u8]) -> Result<FrameRead, StreamError> {
        let eof = self.pump()?;

        if matches!(self.queue.front(), Some(front) if front.fin) {
            let front = self.queue.front_mut().expect("checked above");
            if front.buffer.len() > dst.len() {
                return Err(StreamError::BufferTooSmall);
            }
            let opcode = front.opcode;
            let n = front.buffer.take(dst);
            self.queue.pop_front();
            return Ok(FrameRead::Frame { opcode, len: n });
        }

        if eof {
            Ok(FrameRead::Eof)
        } else {
            Ok(FrameRead::WouldBlock)
        }
    }
}

impl<S: Stream> Stream for WsStream<S> {
    fn fd(&self) -> std::os::fd::RawFd {
        self.decorated.fd()
    }

    fn status(&self) -> Status {
        self.status
    }

    fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, StreamError> {
        let eof = self.pump()?;

        if let Some(front) = self.queue.front_mut() {
            let n = front.buffer.take(dst);
            if front.buffer.is_empty() {
                self.queue.pop_front();
            }
            if n > 0 {
                return Ok(ReadOutcome::Data(n));
            }
        }

        if eof {
            Ok(ReadOutcome::Eof)
        } else {
            Ok(ReadOutcome::WouldBlock)
        }
    }

    fn write(&mut self, src: &[u8]) -> Result<usize, StreamError> {
        let mask = self.outgoing_mask();
        let frame = codec::format_frame(self.data_type, true, mask, src);
        self.decorated.write(&frame)?;
        Ok(src.len())
    }

    fn flush(&mut self) -> Result<FlushOutcome, StreamError> {
        self.decorated.flush()
    }

    fn time(&mut self) -> Result<(), StreamError> {
        if self.keep_alive_timer.running() && self.keep_alive_timer.expired(&self.clock) {
            match self.role {
                Role::Client => {
                    if self.keep_alive_responded {
                        let mask = self.outgoing_mask();
                        let frame = codec::format_frame(Opcode::Ping, true, mask, &[]);
                        self.decorated.write(&frame)?;
                        self.keep_alive_responded = false;
                        self.keep_alive_timer.restart(&self.clock);
                    } else {
                        warn!(fd = self.fd(), "websocket client missing PONG, closing");
                        self.status = Status::Closing;
                    }
                }
                Role::Server => {
                    warn!(fd = self.fd(), "websocket server missing PING, closing");
                    self.status = Status::Closing;
                }
            }
        }
        self.decorated.time()
    }

    fn has_outgoing_data(&self) -> bool {
        has_outgoing_data_through(false, &self.decorated)
    }
}
