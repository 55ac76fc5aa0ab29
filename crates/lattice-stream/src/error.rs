/// Terminal failures of the stream contract.
///
/// "Would block" and "need more data" are not errors — they are ordinary
/// variants of [`crate::ReadOutcome`]/[`crate::FlushOutcome`], so callers
/// are never forced to pattern-match an error enum to find out that a
/// retry is all that's needed.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("destination buffer too small to hold the queued frame")]
    BufferTooSmall,
}
