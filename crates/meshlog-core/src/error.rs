//! Error types shared across the meshlog pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding device frames.
#[derive(Error, Debug)]
pub enum Error {
    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame was valid JSON but not a packet-shaped object.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Description of what's wrong.
        reason: String,
    },
}
