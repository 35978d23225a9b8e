//! nbregress Common Library
//!
//! Notebook document model and the call-site rewriting used to instrument
//! notebooks for screenshot regression runs.

pub mod error;
pub mod inject;
pub mod notebook;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use inject::{inject, split_arguments, keyword_name, CallInjector, CallSite};
pub use notebook::{Cell, CellType, Notebook};
pub use types::*;

/// nbregress version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
