//! TLS termination as a [`lattice_stream::Stream`] decorator, built on
//! `rustls`'s non-blocking record API.

mod error;
mod stream;

pub use error::TlsError;
pub use stream::TlsStream;
