//! Screenshot artifact trees and their comparison
//!
//! ```text
//! <root>/generated_screenshots/<notebook>/<identifier>/<image files>
//! <root>/groundtruth_screenshots/<notebook>/<identifier>/<image files>
//! ```
//!
//! Groundtruth drives the comparison: every groundtruth image is looked up in
//! the generated tree by identifier and file name. Generated images without
//! a groundtruth counterpart are ignored, and a notebook without a
//! groundtruth directory has no baseline yet, which is not a failure.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::E2eResult;
use crate::visual::{ImageComparator, Verdict};

pub const GENERATED_DIR: &str = "generated_screenshots";
pub const GROUNDTRUTH_DIR: &str = "groundtruth_screenshots";

/// Where screenshot trees live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotLayout {
    root: PathBuf,
}

impl Default for ScreenshotLayout {
    fn default() -> Self {
        Self::new("tests")
    }
}

impl ScreenshotLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generated_dir(&self, notebook: &str) -> PathBuf {
        self.root.join(GENERATED_DIR).join(notebook)
    }

    pub fn groundtruth_dir(&self, notebook: &str) -> PathBuf {
        self.root.join(GROUNDTRUTH_DIR).join(notebook)
    }

    pub fn generated_target(&self, notebook: &str, identifier: &str) -> PathBuf {
        self.generated_dir(notebook).join(identifier)
    }

    pub fn groundtruth_target(&self, notebook: &str, identifier: &str) -> PathBuf {
        self.groundtruth_dir(notebook).join(identifier)
    }

    /// Notebooks that have a groundtruth directory
    pub fn baseline_notebooks(&self) -> E2eResult<Vec<String>> {
        let dir = self.root.join(GROUNDTRUTH_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        Ok(children(&dir, true)?.into_iter().map(|(name, _)| name).collect())
    }
}

/// Result of one groundtruth lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Both images exist and were compared
    Compared { verdict: Verdict },
    /// No generated directory for this identifier; nothing compared
    TargetNotFound,
    /// Groundtruth image without a generated counterpart
    FileNotFound,
    /// The comparator could not produce a verdict
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    pub identifier: String,
    /// Image file name; `None` for identifier-level outcomes
    pub file: Option<String>,
    pub outcome: Outcome,
}

impl ComparisonEntry {
    pub fn is_failure(&self) -> bool {
        match &self.outcome {
            Outcome::Compared { verdict } => !verdict.passed,
            Outcome::Error { .. } => true,
            Outcome::TargetNotFound | Outcome::FileNotFound => false,
        }
    }
}

/// Aggregate comparison result for one notebook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub notebook: String,
    /// Whether a groundtruth directory exists for the notebook
    pub baseline_present: bool,
    pub entries: Vec<ComparisonEntry>,
}

impl ComparisonReport {
    fn without_baseline(notebook: &str) -> Self {
        Self {
            notebook: notebook.to_string(),
            baseline_present: false,
            entries: Vec::new(),
        }
    }

    /// No mismatch and no comparator error. Missing artifacts do not fail.
    pub fn passed(&self) -> bool {
        !self.entries.iter().any(ComparisonEntry::is_failure)
    }

    pub fn comparisons(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Compared { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ComparisonEntry> {
        self.entries.iter().filter(|e| e.is_failure())
    }

    pub fn not_found(&self) -> impl Iterator<Item = &ComparisonEntry> {
        self.entries.iter().filter(|e| {
            matches!(e.outcome, Outcome::TargetNotFound | Outcome::FileNotFound)
        })
    }
}

/// Compare the generated screenshots of `notebook` against groundtruth.
///
/// Every pair is compared; mismatches and comparator errors are collected
/// into the report rather than aborting the remaining comparisons.
pub fn compare_notebook(
    layout: &ScreenshotLayout,
    notebook: &str,
    comparator: &dyn ImageComparator,
    tolerance: f64,
) -> E2eResult<ComparisonReport> {
    let groundtruth = layout.groundtruth_dir(notebook);
    if !groundtruth.is_dir() {
        debug!("No groundtruth for {} at {}", notebook, groundtruth.display());
        return Ok(ComparisonReport::without_baseline(notebook));
    }

    let mut entries = Vec::new();

    for (identifier, expected_dir) in children(&groundtruth, true)? {
        let generated = layout.generated_target(notebook, &identifier);
        if !generated.is_dir() {
            info!("Screenshot directory not found: {}", generated.display());
            entries.push(ComparisonEntry {
                identifier,
                file: None,
                outcome: Outcome::TargetNotFound,
            });
            continue;
        }

        for (file, expected) in children(&expected_dir, false)? {
            let actual = generated.join(&file);
            let outcome = if !actual.is_file() {
                info!("Screenshot not found: {}", actual.display());
                Outcome::FileNotFound
            } else {
                match comparator.compare(&expected, &actual, tolerance) {
                    Ok(verdict) => {
                        debug!(
                            "{}/{}: {}",
                            identifier,
                            file,
                            if verdict.passed { "match" } else { "MISMATCH" }
                        );
                        Outcome::Compared { verdict }
                    }
                    Err(e) => {
                        warn!("Could not compare {}: {}", actual.display(), e);
                        Outcome::Error {
                            message: e.to_string(),
                        }
                    }
                }
            };

            entries.push(ComparisonEntry {
                identifier: identifier.clone(),
                file: Some(file),
                outcome,
            });
        }
    }

    Ok(ComparisonReport {
        notebook: notebook.to_string(),
        baseline_present: true,
        entries,
    })
}

/// Copy every generated screenshot of `notebook` into groundtruth,
/// replacing existing baselines. Returns the number of files copied.
pub fn promote_baselines(layout: &ScreenshotLayout, notebook: &str) -> E2eResult<usize> {
    let generated = layout.generated_dir(notebook);
    if !generated.is_dir() {
        warn!("No generated screenshots for {} at {}", notebook, generated.display());
        return Ok(0);
    }

    let groundtruth = layout.groundtruth_dir(notebook);
    let mut copied = 0;

    for entry in WalkDir::new(&generated).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&generated) else {
            continue;
        };
        let target = groundtruth.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(entry.path(), &target)?;
        copied += 1;
    }

    info!("Updated {} baseline(s) for {}", copied, notebook);
    Ok(copied)
}

/// Immediate children of `dir` (directories or files), sorted by name.
fn children(dir: &Path, directories: bool) -> E2eResult<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let wanted = if directories {
            entry.file_type().is_dir()
        } else {
            entry.file_type().is_file()
        };
        if wanted {
            out.push((entry.file_name().to_string_lossy().to_string(), entry.into_path()));
        }
    }
    Ok(out)
}
