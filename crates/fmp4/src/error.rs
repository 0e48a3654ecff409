use thiserror::Error;

/// Errors produced while decoding an atom stream.
///
/// Both `TruncatedStream` and `MalformedBox` are terminal for the reader
/// that produced them: once a box boundary is lost there is no way to
/// resynchronize, so consumers must abort the owning session instead of
/// skipping forward.
#[derive(Error, Debug)]
pub enum Fmp4Error {
    #[error("source ended mid-read: expected {expected} bytes, got {got}")]
    TruncatedStream { expected: usize, got: usize },

    #[error("malformed box '{fourcc}': payload length {len} out of bounds")]
    MalformedBox { fourcc: String, len: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
