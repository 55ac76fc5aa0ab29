use std::io;
use std::sync::Arc;

use lattice_stream::{has_outgoing_data_through, FlushOutcome, ReadOutcome, Status, Stream, StreamError};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use tracing::debug;

use crate::error::TlsError;

const RECORD_BUFFER_SIZE: usize = 16 * 1024;

enum Role {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl Role {
    fn conn(&mut self) -> &mut dyn Connection {
        match self {
            Role::Client(c) => c,
            Role::Server(c) => c,
        }
    }
}

/// Terminates a TLS session above a decorated byte stream.
///
/// The handshake runs lazily, driven by whichever of `read`/`write`/`flush`
/// is called first, exactly as the decorated layer beneath it never blocks:
/// encrypted records are pushed to the inner stream's own outgoing queue as
/// soon as they're produced, so this layer carries no queue of its own.
pub struct TlsStream<S: Stream> {
    decorated: S,
    status: Status,
    role: Role,
}

impl<S: Stream> TlsStream<S> {
    /// Wraps `decorated` as the TLS client of `server_name`.
    pub fn new_client(decorated: S, config: Arc<ClientConfig>, server_name: &str) -> Result<Self, TlsError> {
        let name = ServerName::try_from(server_name.to_string())?;
        let conn = ClientConnection::new(config, name)?;
        Ok(Self { decorated, status: Status::Init, role: Role::Client(conn) })
    }

    /// Wraps `decorated` as the TLS server accepting a new session.
    pub fn new_server(decorated: S, config: Arc<ServerConfig>) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(config)?;
        Ok(Self { decorated, status: Status::Init, role: Role::Server(conn) })
    }

    /// Reads any ciphertext the decorated stream has available and feeds it
    /// to the TLS engine. Returns whether the decorated stream reported EOF.
    fn pull_records(&mut self) -> Result<bool, StreamError> {
        let mut scratch = [0u8; RECORD_BUFFER_SIZE];
        loop {
            match self.decorated.read(&mut scratch)? {
                ReadOutcome::WouldBlock => return Ok(false),
                ReadOutcome::Eof => return Ok(true),
                ReadOutcome::Data(n) => {
                    let mut cursor = &scratch[..n];
                    let read = self.role.conn().read_tls(&mut cursor).map_err(io_to_stream_error)?;
                    if read == 0 {
                        continue;
                    }
                    if let Err(e) = self.role.conn().process_new_packets() {
                        debug!(fd = self.fd(), "tls: {e}");
                        return Err(StreamError::ProtocolViolation("tls record processing failed"));
                    }
                }
            }
        }
    }

    /// Pushes any ciphertext the TLS engine has queued for the wire out
    /// through the decorated stream.
    fn push_records(&mut self) -> Result<(), StreamError> {
        let mut scratch = Vec::with_capacity(RECORD_BUFFER_SIZE);
        while self.role.conn().wants_write() {
            scratch.clear();
            self.role.conn().write_tls(&mut scratch).map_err(io_to_stream_error)?;
            if scratch.is_empty() {
                break;
            }
            self.decorated.write(&scratch)?;
        }
        Ok(())
    }

    fn drive_handshake(&mut self) -> Result<bool, StreamError> {
        let eof = self.pull_records()?;
        self.push_records()?;
        if !self.role.conn().is_handshaking() {
            self.status = Status::Ready;
        }
        Ok(eof)
    }
}

fn io_to_stream_error(e: io::Error) -> StreamError {
    StreamError::Io(e)
}

impl<S: Stream> Stream for TlsStream<S> {
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
        let eof = self.drive_handshake()?;

        if self.status.is_ready() {
            match io::Read::read(&mut self.role.conn().reader(), dst) {
                Ok(0) if eof => return Ok(ReadOutcome::Eof),
                Ok(0) => return Ok(ReadOutcome::WouldBlock),
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(StreamError::Io(e)),
            }
        }

        if eof {
            Ok(ReadOutcome::Eof)
        } else {
            Ok(ReadOutcome::WouldBlock)
        }
    }

    fn write(&mut self, src: &[u8]) -> Result<usize, StreamError> {
        self.drive_handshake()?;

        let n = io::Write::write(&mut self.role.conn().writer(), src)?;
        self.push_records()?;
        Ok(n)
    }

    fn flush(&mut self) -> Result<FlushOutcome, StreamError> {
        self.push_records()?;
        self.decorated.flush()
    }

    fn time(&mut self) -> Result<(), StreamError> {
        self.decorated.time()
    }

    fn has_outgoing_data(&self) -> bool {
        has_outgoing_data_through(false, &self.decorated)
    }
}

#[cfg(test)]
mod tests {
    use lattice_stream::RawStream;
    use std::net::TcpListener;

    use super::*;

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
    fn invalid_server_name_is_rejected_before_touching_the_socket() {
        let (_server, client_sock) = loopback_pair();
        let roots = rustls::RootCertStore::empty();
        let config = Arc::new(ClientConfig::builder().with_root_certificates(roots).with_no_client_auth());

        let err = TlsStream::new_client(client_sock, config, "not a valid dns name!!").unwrap_err();
        assert!(matches!(err, TlsError::InvalidServerName(_)));
    }

    #[test]
    fn fresh_client_stream_starts_in_init_status_and_has_no_outgoing_data() {
        let (_server, client_sock) = loopback_pair();
        let roots = rustls::RootCertStore::empty();
        let config = Arc::new(ClientConfig::builder().with_root_certificates(roots).with_no_client_auth());

        let stream = TlsStream::new_client(client_sock, config, "example.com").unwrap();
        assert_eq!(stream.status(), Status::Init);
        assert!(!stream.has_outgoing_data());
    }
}
