//! Error types for nbregress

use thiserror::Error;

/// Result type alias using the nbregress common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading, writing or inspecting notebook documents.
///
/// Rewriting call sites never produces an error: malformed or absent calls
/// leave the text untouched.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid notebook {path}: {reason}")]
    InvalidNotebook { path: String, reason: String },

    #[error("Invalid call name: {0}")]
    InvalidCallee(String),
}
