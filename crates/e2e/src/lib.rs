//! nbregress notebook regression runner
//!
//! This crate drives screenshot regression runs over notebooks:
//! - Instruments designated calls in code cells with test parameters
//! - Executes the notebook through an external engine with a timeout
//! - Compares generated screenshots against checked-in groundtruth
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  NotebookRunner (one run)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Loaded                                                     │
//! │    ├── instrument()  CallInjector per code cell             │
//! │  Instrumented                                               │
//! │    ├── persist()     overwrite the notebook file            │
//! │  Persisted                                                  │
//! │    ├── execute()     Executor (nbconvert) + timeout         │
//! │  Executed ─────────────────────────── or ExecutionFailed    │
//! │    └── compare()     ScreenshotLayout + ImageComparator     │
//! │  Compared                                                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod runner;
pub mod screenshots;
pub mod visual;

pub use config::RunnerConfig;
pub use error::{E2eError, E2eResult, ExecutionError};
pub use executor::{ExecutionRequest, Executor, NbconvertExecutor};
pub use runner::{InstrumentSummary, NotebookReport, NotebookRunner, RunContext, RunState, SuiteReport};
pub use screenshots::{compare_notebook, promote_baselines, ComparisonReport, Outcome, ScreenshotLayout};
pub use visual::{ImageComparator, PixelComparator, Verdict};
