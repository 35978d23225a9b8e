//! Run configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nbregress_common::{CallInjector, DEFAULT_CALLEE};

use crate::error::{E2eError, E2eResult};

/// Default wall-clock budget for executing one notebook
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Default RMS tolerance (0-255 channel scale) for screenshot comparison
pub const DEFAULT_TOLERANCE: f64 = 2.0;

/// Settings shared by every notebook in a run.
///
/// Every field is optional in the YAML form; missing fields take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Value injected as `_take_screenshot`
    pub take_screenshot: bool,

    /// Execution timeout in seconds
    pub timeout_secs: u64,

    /// Comparator tolerance
    pub tolerance: f64,

    /// Working directory handed to the execution engine
    pub working_dir: PathBuf,

    /// Directory holding `generated_screenshots/` and `groundtruth_screenshots/`
    pub screenshot_root: PathBuf,

    /// Where comparison diff images go (none written when unset)
    pub diff_dir: Option<PathBuf>,

    /// Where run reports go
    pub output_dir: PathBuf,

    /// Designated call to instrument
    pub callee: String,

    /// Program used by the default executor
    pub jupyter: PathBuf,

    /// Kernel to execute with (notebook metadata decides when unset)
    pub kernel: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            take_screenshot: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            tolerance: DEFAULT_TOLERANCE,
            working_dir: PathBuf::from("."),
            screenshot_root: PathBuf::from("tests"),
            diff_dir: None,
            output_dir: PathBuf::from("test-results"),
            callee: DEFAULT_CALLEE.to_string(),
            jupyter: PathBuf::from("jupyter"),
            kernel: None,
        }
    }
}

impl RunnerConfig {
    /// Parse a config from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn injector(&self) -> E2eResult<CallInjector> {
        Ok(CallInjector::new(&self.callee)?)
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.timeout_secs == 0 {
            return Err(E2eError::Config("timeout_secs must be positive".into()));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(E2eError::Config(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        self.injector()?;
        Ok(())
    }
}
