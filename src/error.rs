//! Crate-wide error type for fallible I/O at the edges (model loading, image
//! search, session persistence). The narration core never returns errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    /// A required capability (audio output, image search key) is missing.
    #[error("{0} is not available")]
    CapabilityUnavailable(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to load speech model: {0}")]
    ModelLoad(String),
}
