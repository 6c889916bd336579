//! Error kinds.

use std::fmt;

#[derive(Debug)]
pub enum ChordError {
    /// Peer unreachable or TLS failure.
    Transport(String),
    /// A local store lookup missed. Callers treat this as `ok=false`, not
    /// as an exceptional condition; it only appears in this enum so RPC
    /// plumbing has a uniform `Result` to thread through.
    NotFound,
    /// A descriptor from the wire failed `SHA-1(addr) == id`.
    IdentityMismatch,
    /// Client framing error.
    Malformed(String),
    /// Fatal at startup: missing cert, bad address, unreadable config.
    Configured(String),
}

impl fmt::Display for ChordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChordError::Transport(msg) => write!(f, "transport error: {}", msg),
            ChordError::NotFound => write!(f, "not found"),
            ChordError::IdentityMismatch => write!(f, "identity mismatch"),
            ChordError::Malformed(msg) => write!(f, "malformed message: {}", msg),
            ChordError::Configured(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ChordError {}

impl From<tonic::Status> for ChordError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::PermissionDenied => ChordError::IdentityMismatch,
            tonic::Code::NotFound => ChordError::NotFound,
            _ => ChordError::Transport(status.message().to_string()),
        }
    }
}

impl From<tonic::transport::Error> for ChordError {
    fn from(err: tonic::transport::Error) -> Self {
        ChordError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for ChordError {
    fn from(err: std::io::Error) -> Self {
        ChordError::Configured(err.to_string())
    }
}

impl From<ini::Error> for ChordError {
    fn from(err: ini::Error) -> Self {
        ChordError::Configured(err.to_string())
    }
}

/// Maps a `ChordError` to the `tonic::Status` an RPC handler should return.
/// `NotFound` is a normal signal and is never surfaced this way; callers
/// that would otherwise build a `Status` from it should branch earlier.
impl From<ChordError> for tonic::Status {
    fn from(err: ChordError) -> Self {
        match err {
            ChordError::IdentityMismatch => tonic::Status::permission_denied(err.to_string()),
            ChordError::Transport(msg) => tonic::Status::unavailable(msg),
            ChordError::NotFound => tonic::Status::not_found("not found"),
            ChordError::Malformed(msg) => tonic::Status::invalid_argument(msg),
            ChordError::Configured(msg) => tonic::Status::internal(msg),
        }
    }
}
