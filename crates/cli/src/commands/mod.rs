//! CLI Commands

pub mod baselines;
pub mod compare;
pub mod instrument;
pub mod run;

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use nbregress_e2e::RunnerConfig;

/// Notebook run when no subcommand is given
pub const DEFAULT_NOTEBOOK: &str = "notebooks/examples/test_notebook.ipynb";

/// Settings shared by every subcommand; each overrides the config file
#[derive(Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// Inject `_take_screenshot=False` instead of `True`
    #[arg(long)]
    pub no_screenshot: bool,

    /// Execution timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Screenshot comparison tolerance (RMS, 0-255 scale)
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Directory holding generated_screenshots/ and groundtruth_screenshots/
    #[arg(long)]
    pub screenshot_root: Option<PathBuf>,

    /// Working directory for notebook execution
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Write diff images for mismatching screenshots here
    #[arg(long)]
    pub diff_dir: Option<PathBuf>,

    /// Output directory for run reports
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Call to instrument
    #[arg(long)]
    pub callee: Option<String>,

    /// Jupyter executable
    #[arg(long, env = "NBREGRESS_JUPYTER")]
    pub jupyter: Option<PathBuf>,

    /// Kernel name to execute with
    #[arg(long)]
    pub kernel: Option<String>,
}

impl RunOptions {
    fn apply(&self, config: &mut RunnerConfig) {
        if self.no_screenshot {
            config.take_screenshot = false;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(root) = &self.screenshot_root {
            config.screenshot_root = root.clone();
        }
        if let Some(dir) = &self.working_dir {
            config.working_dir = dir.clone();
        }
        if let Some(dir) = &self.diff_dir {
            config.diff_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.output {
            config.output_dir = dir.clone();
        }
        if let Some(callee) = &self.callee {
            config.callee = callee.clone();
        }
        if let Some(jupyter) = &self.jupyter {
            config.jupyter = jupyter.clone();
        }
        if let Some(kernel) = &self.kernel {
            config.kernel = Some(kernel.clone());
        }
    }
}

/// Config file values, then command-line overrides
pub fn load_config(config_file: Option<&Path>, options: &RunOptions) -> Result<RunnerConfig> {
    let mut config = match config_file {
        Some(path) => RunnerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RunnerConfig::default(),
    };
    options.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Expand directories into the `.ipynb` files below them, skipping
/// checkpoint copies.
pub fn collect_notebooks(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut notebooks = Vec::new();

    for input in inputs {
        if !input.is_dir() {
            notebooks.push(input.clone());
            continue;
        }

        for entry in WalkDir::new(input)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".ipynb_checkpoints")
        {
            let entry = entry.with_context(|| format!("walking {}", input.display()))?;
            let is_notebook = entry
                .path()
                .extension()
                .map(|ext| ext == "ipynb")
                .unwrap_or(false);
            if entry.file_type().is_file() && is_notebook {
                notebooks.push(entry.into_path());
            }
        }
    }

    Ok(notebooks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nbregress.yaml");
        std::fs::write(&file, "timeout_secs: 60\ntolerance: 1.5\n").unwrap();

        let options = RunOptions {
            timeout: Some(120),
            no_screenshot: true,
            ..Default::default()
        };
        let config = load_config(Some(&file), &options).unwrap();
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.tolerance, 1.5);
        assert!(!config.take_screenshot);
    }

    #[test]
    fn test_collect_notebooks_skips_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/.ipynb_checkpoints")).unwrap();
        std::fs::write(dir.path().join("b.ipynb"), "{}").unwrap();
        std::fs::write(dir.path().join("sub/a.ipynb"), "{}").unwrap();
        std::fs::write(dir.path().join("sub/.ipynb_checkpoints/a-checkpoint.ipynb"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.md"), "").unwrap();

        let found = collect_notebooks(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(names, vec![PathBuf::from("b.ipynb"), PathBuf::from("sub/a.ipynb")]);
    }
}
