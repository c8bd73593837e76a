//! Crate error type

use thiserror::Error;

/// Errors produced by the progress store and transfer machinery.
///
/// Validation failures are logged at the boundary and never abort the
/// calling operation; I/O failures degrade to in-memory state. Transport
/// failures are surfaced as terminal transfer statuses, not as this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected playback progress values (negative, inverted or non-finite).
    #[error("invalid progress values: position {position}, duration {duration}")]
    InvalidProgress { position: f64, duration: f64 },

    /// Durable read/write or file-move failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure for a durable document.
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
