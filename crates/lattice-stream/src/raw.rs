use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};

use tracing::debug;

use crate::queue::OutgoingQueue;
use crate::status::Status;
use crate::{FlushOutcome, ReadOutcome, Stream, StreamError};

/// The leaf of the decoration chain: a non-blocking socket with its own
/// outgoing queue. Every decorator above it (TLS, WS, MQTT) eventually
/// calls down into a `RawStream`'s `read`/`write`/`flush`.
pub struct RawStream {
    socket: mio::net::TcpStream,
    status: Status,
    outgoing: OutgoingQueue,
}

impl RawStream {
    pub fn new(socket: mio::net::TcpStream) -> Self {
        Self { socket, status: Status::Ready, outgoing: OutgoingQueue::new() }
    }

    pub fn socket(&self) -> &mio::net::TcpStream {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut mio::net::TcpStream {
        &mut self.socket
    }

    /// Sets the kernel send/receive socket buffer sizes. Best-effort: a
    /// failing `setsockopt` is logged, not propagated, since it never
    /// affects correctness, only throughput.
    pub fn set_socket_buf_size(&self, size: usize) {
        let fd = self.socket.as_raw_fd();
        let size = size as libc::c_int;
        let len = core::mem::size_of::<libc::c_int>() as libc::socklen_t;
        unsafe {
            if libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_SNDBUF,
                std::ptr::from_ref(&size).cast(),
                len,
            ) != 0
            {
                debug!(err = %io::Error::last_os_error(), "raw stream: set SO_SNDBUF failed");
            }
            if libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                std::ptr::from_ref(&size).cast(),
                len,
            ) != 0
            {
                debug!(err = %io::Error::last_os_error(), "raw stream: set SO_RCVBUF failed");
            }
        }
    }
}

impl Stream for RawStream {
    fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn status(&self) -> Status {
        self.status
    }

    fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, StreamError> {
        match self.socket.read(dst) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => {
                self.status = Status::Closing;
                Err(e.into())
            }
        }
    }

    fn write(&mut self, src: &[u8]) -> Result<usize, StreamError> {
        if !self.outgoing.is_empty() {
            self.outgoing.push_back(src.to_vec());
            return Ok(src.len());
        }

        match self.socket.write(src) {
            Ok(n) if n == src.len() => Ok(src.len()),
            Ok(n) => {
                self.outgoing.push_back(src[n..].to_vec());
                Ok(src.len())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.outgoing.push_back(src.to_vec());
                Ok(src.len())
            }
            Err(e) => {
                self.status = Status::Closing;
                Err(e.into())
            }
        }
    }

    fn flush(&mut self) -> Result<FlushOutcome, StreamError> {
        match self.outgoing.drain_into(&mut self.socket) {
            Ok(true) => Ok(FlushOutcome::Done),
            Ok(false) => Ok(FlushOutcome::WouldBlock),
            Err(e) => {
                self.status = Status::Closing;
                Err(e.into())
            }
        }
    }

    fn time(&mut self) -> Result<(), StreamError> {
        Ok(())
    }

    fn has_outgoing_data(&self) -> bool {
        !self.outgoing.is_empty()
    }
}
