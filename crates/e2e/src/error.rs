//! Error types for notebook regression runs

use std::time::Duration;
use thiserror::Error;

use crate::runner::RunState;

/// Why the external execution engine did not hand back an executed notebook
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Notebook execution failed ({status}): {summary}")]
    Failed { status: String, summary: String },

    #[error("Notebook execution timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Executed notebook unreadable: {0}")]
    Notebook(#[from] nbregress_common::Error),

    #[error("IO error during execution: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum E2eError {
    #[error(transparent)]
    Notebook(#[from] nbregress_common::Error),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: RunState, to: RunState },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Image comparison failed for {path}: {reason}")]
    Comparison { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
