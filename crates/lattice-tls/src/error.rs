use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("tls handshake or record error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("invalid server name: {0}")]
    InvalidServerName(#[from] rustls::pki_types::InvalidDnsNameError),
}
