//! Layered byte-stream networking: a raw TCP socket decorated, in any
//! order the caller wants, with TLS termination and a WebSocket or MQTT
//! framing layer, all driven from a single-threaded non-blocking poller.
//!
//! Every layer implements [`stream::Stream`], so a `MqttStream<TlsStream<RawStream>>`
//! and a bare `RawStream` are interchangeable wherever the trait is
//! expected. This crate does not introduce a new abstraction of its own;
//! it re-exports the per-concern crates under short module names so a
//! caller can build a stack with one `use`.

pub use lattice_buffer as buffer;
pub use lattice_mqtt as mqtt;
pub use lattice_poll as poll;
pub use lattice_stream as stream;
pub use lattice_time as time;
pub use lattice_tls as tls;
pub use lattice_url as url;
pub use lattice_ws as ws;

pub use lattice_http as http;
pub use tracing;

#[cfg(test)]
mod tests;
