//! Orchestration of one notebook regression run: instrument, execute, compare

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use nbregress_common::{CallInjector, Notebook, RequiredParams};

use crate::config::RunnerConfig;
use crate::error::{E2eError, E2eResult};
use crate::executor::{ExecutionRequest, Executor, NbconvertExecutor};
use crate::screenshots::{compare_notebook, ComparisonReport, ScreenshotLayout};
use crate::visual::{ImageComparator, PixelComparator};

/// Prefix of the identifiers handed to instrumented calls
pub const TARGET_PREFIX: &str = "interactive_";

/// Where an orchestration run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Loaded,
    Instrumented,
    Persisted,
    Executed,
    Compared,
    ExecutionFailed,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Loaded, Instrumented)
                | (Instrumented, Persisted)
                | (Persisted, Executed)
                | (Persisted, ExecutionFailed)
                | (Executed, Compared)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Compared | RunState::ExecutionFailed)
    }
}

/// State of a single run, threaded through every phase.
///
/// The identifier counter lives here, so identifiers restart with every run
/// and are never reused within one.
#[derive(Debug, Clone)]
pub struct RunContext {
    notebook_path: PathBuf,
    notebook_name: String,
    state: RunState,
    issued: usize,
}

impl RunContext {
    pub fn new(notebook_path: &Path) -> E2eResult<Self> {
        let notebook_name = notebook_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                E2eError::Config(format!("not a notebook file: {}", notebook_path.display()))
            })?;

        Ok(Self {
            notebook_path: notebook_path.to_path_buf(),
            notebook_name,
            state: RunState::Loaded,
            issued: 0,
        })
    }

    pub fn notebook_path(&self) -> &Path {
        &self.notebook_path
    }

    /// File name of the notebook, e.g. `test_notebook.ipynb`
    pub fn notebook_name(&self) -> &str {
        &self.notebook_name
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Issue the next call identifier (`interactive_1`, `interactive_2`, ...)
    pub fn next_target(&mut self) -> String {
        self.issued += 1;
        format!("{}{}", TARGET_PREFIX, self.issued)
    }

    fn ensure_can_reach(&self, next: RunState) -> E2eResult<()> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(E2eError::InvalidStateTransition {
                from: self.state,
                to: next,
            })
        }
    }

    fn advance(&mut self, next: RunState) -> E2eResult<()> {
        self.ensure_can_reach(next)?;
        debug!("{}: {:?} -> {:?}", self.notebook_name, self.state, next);
        self.state = next;
        Ok(())
    }
}

/// What instrumentation changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSummary {
    /// Code cells whose source was rewritten
    pub cells_modified: usize,
    /// Identifiers issued, in document order
    pub targets: Vec<String>,
}

/// Result of running a single notebook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookReport {
    pub notebook: String,
    pub path: PathBuf,
    pub state: RunState,
    pub success: bool,
    pub duration_ms: u64,
    pub targets: Vec<String>,
    pub comparison: Option<ComparisonReport>,
    pub error: Option<String>,
}

/// Result of running several notebooks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<NotebookReport>,
}

/// Drives instrument -> execute -> compare over notebooks
pub struct NotebookRunner {
    config: RunnerConfig,
    injector: CallInjector,
    layout: ScreenshotLayout,
    executor: Box<dyn Executor>,
    comparator: Box<dyn ImageComparator>,
}

impl NotebookRunner {
    /// Create a runner with the nbconvert executor and pixel comparator
    pub fn with_config(config: RunnerConfig) -> E2eResult<Self> {
        config.validate()?;

        let executor = NbconvertExecutor::new(&config.jupyter, config.kernel.clone());
        let comparator = match &config.diff_dir {
            Some(dir) => PixelComparator::with_diff_dir(dir),
            None => PixelComparator::new(),
        };

        Ok(Self {
            injector: config.injector()?,
            layout: ScreenshotLayout::new(&config.screenshot_root),
            executor: Box::new(executor),
            comparator: Box::new(comparator),
            config,
        })
    }

    pub fn with_executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Box::new(executor);
        self
    }

    pub fn with_comparator(mut self, comparator: impl ImageComparator + 'static) -> Self {
        self.comparator = Box::new(comparator);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn layout(&self) -> &ScreenshotLayout {
        &self.layout
    }

    /// Phase A: rewrite every designated call of every code cell, in
    /// document order. Non-code cells are never touched.
    pub fn instrument(
        &self,
        ctx: &mut RunContext,
        notebook: &mut Notebook,
    ) -> E2eResult<InstrumentSummary> {
        ctx.ensure_can_reach(RunState::Instrumented)?;
        let notebook_name = ctx.notebook_name().to_string();
        let take_screenshot = self.config.take_screenshot;
        let mut summary = InstrumentSummary::default();

        for cell in notebook.code_cells_mut() {
            let source = cell.source();
            let rewritten = self.injector.inject_each(&source, |_| {
                let target = ctx.next_target();
                summary.targets.push(target.clone());
                RequiredParams::instrumentation(&notebook_name, &target, take_screenshot)
            });

            if rewritten != source {
                cell.set_source(&rewritten);
                summary.cells_modified += 1;
            }
        }

        ctx.advance(RunState::Instrumented)?;
        info!(
            "Instrumented {}: {} call(s) in {} cell(s)",
            notebook_name,
            summary.targets.len(),
            summary.cells_modified
        );
        Ok(summary)
    }

    /// Write the instrumented notebook back over the original
    pub fn persist(&self, ctx: &mut RunContext, notebook: &Notebook) -> E2eResult<()> {
        ctx.ensure_can_reach(RunState::Persisted)?;
        notebook.write(ctx.notebook_path())?;
        ctx.advance(RunState::Persisted)
    }

    /// Phase B: run the persisted notebook; the executed document replaces
    /// the file on success. Failure is terminal for the run.
    pub async fn execute(&self, ctx: &mut RunContext, notebook: Notebook) -> E2eResult<Notebook> {
        ctx.ensure_can_reach(RunState::Executed)?;
        let request = ExecutionRequest {
            notebook_path: ctx.notebook_path().to_path_buf(),
            working_dir: self.config.working_dir.clone(),
            timeout: self.config.timeout(),
        };

        match self.executor.run(notebook, &request).await {
            Ok(executed) => {
                executed.write(ctx.notebook_path())?;
                ctx.advance(RunState::Executed)?;
                info!("Notebook {} executed successfully", ctx.notebook_name());
                Ok(executed)
            }
            Err(e) => {
                ctx.advance(RunState::ExecutionFailed)?;
                error!("Error executing notebook {}: {}", ctx.notebook_name(), e);
                Err(e.into())
            }
        }
    }

    /// Phase C: compare generated screenshots against groundtruth
    pub fn compare(&self, ctx: &mut RunContext) -> E2eResult<ComparisonReport> {
        ctx.ensure_can_reach(RunState::Compared)?;
        let report = self.compare_only(ctx.notebook_name())?;
        ctx.advance(RunState::Compared)?;
        Ok(report)
    }

    /// Compare existing screenshot trees without running anything
    pub fn compare_only(&self, notebook_name: &str) -> E2eResult<ComparisonReport> {
        let report = compare_notebook(
            &self.layout,
            notebook_name,
            self.comparator.as_ref(),
            self.config.tolerance,
        )?;

        if !report.baseline_present {
            info!("No groundtruth screenshots for {}, skipping comparison", notebook_name);
        } else if report.passed() {
            info!(
                "{}: {} screenshot(s) match groundtruth",
                notebook_name,
                report.comparisons()
            );
        } else {
            warn!(
                "{}: {} of {} screenshot comparison(s) failed",
                notebook_name,
                report.failures().count(),
                report.entries.len()
            );
        }
        Ok(report)
    }

    /// Phase A alone: load, instrument and persist a notebook
    pub fn instrument_file(&self, path: &Path) -> E2eResult<InstrumentSummary> {
        let mut ctx = RunContext::new(path)?;
        let mut notebook = Notebook::read(path)?;
        let summary = self.instrument(&mut ctx, &mut notebook)?;
        self.persist(&mut ctx, &notebook)?;
        Ok(summary)
    }

    /// One full orchestration run. Execution failures are returned as errors.
    pub async fn run(&self, path: &Path) -> E2eResult<NotebookReport> {
        let mut ctx = RunContext::new(path)?;
        self.run_with(&mut ctx).await
    }

    async fn run_with(&self, ctx: &mut RunContext) -> E2eResult<NotebookReport> {
        let start = Instant::now();
        let mut notebook = Notebook::read(ctx.notebook_path())?;

        let summary = self.instrument(ctx, &mut notebook)?;
        self.persist(ctx, &notebook)?;
        self.execute(ctx, notebook).await?;
        let comparison = self.compare(ctx)?;

        Ok(NotebookReport {
            notebook: ctx.notebook_name().to_string(),
            path: ctx.notebook_path().to_path_buf(),
            state: ctx.state(),
            success: comparison.passed(),
            duration_ms: start.elapsed().as_millis() as u64,
            targets: summary.targets,
            comparison: Some(comparison),
            error: None,
        })
    }

    /// Run notebooks one after another; a failing notebook is recorded and
    /// the next one still runs.
    pub async fn run_all(&self, paths: &[PathBuf]) -> SuiteReport {
        let start = Instant::now();
        let mut results = Vec::with_capacity(paths.len());

        info!("Running {} notebook(s)...", paths.len());

        for path in paths {
            let started = Instant::now();
            let outcome = match RunContext::new(path) {
                Ok(mut ctx) => {
                    let result = self.run_with(&mut ctx).await;
                    result.map_err(|e| (e, Some(ctx.state())))
                }
                Err(e) => Err((e, None)),
            };

            let report = match outcome {
                Ok(report) => {
                    if report.success {
                        info!("✓ {} ({} ms)", report.notebook, report.duration_ms);
                    } else {
                        error!("✗ {} - screenshot mismatch", report.notebook);
                    }
                    report
                }
                Err((e, state)) => {
                    error!("✗ {} - {}", path.display(), e);
                    NotebookReport {
                        notebook: path
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default(),
                        path: path.clone(),
                        state: state.unwrap_or(RunState::Loaded),
                        success: false,
                        duration_ms: started.elapsed().as_millis() as u64,
                        targets: Vec::new(),
                        comparison: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(report);
        }

        let passed = results.iter().filter(|r| r.success).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Notebook results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        SuiteReport {
            generated_at: Utc::now(),
            total: results.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    /// Write the suite report to JSON in the output directory
    pub fn write_report(&self, report: &SuiteReport) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("notebook-results.json");
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use RunState::*;
        assert!(Loaded.can_transition_to(Instrumented));
        assert!(Persisted.can_transition_to(ExecutionFailed));
        assert!(!Loaded.can_transition_to(Executed));
        assert!(!ExecutionFailed.can_transition_to(Compared));
        assert!(!Compared.can_transition_to(Loaded));
        assert!(Compared.is_terminal() && ExecutionFailed.is_terminal());
    }

    #[test]
    fn test_targets_are_sequential_per_context() {
        let mut ctx = RunContext::new(Path::new("nb/test_notebook.ipynb")).unwrap();
        assert_eq!(ctx.notebook_name(), "test_notebook.ipynb");
        assert_eq!(ctx.next_target(), "interactive_1");
        assert_eq!(ctx.next_target(), "interactive_2");

        let mut fresh = RunContext::new(Path::new("nb/test_notebook.ipynb")).unwrap();
        assert_eq!(fresh.next_target(), "interactive_1");
    }

    #[test]
    fn test_invalid_transition_is_error() {
        let mut ctx = RunContext::new(Path::new("nb.ipynb")).unwrap();
        let err = ctx.advance(RunState::Compared).unwrap_err();
        assert!(matches!(
            err,
            E2eError::InvalidStateTransition {
                from: RunState::Loaded,
                to: RunState::Compared
            }
        ));
    }

    #[test]
    fn test_context_requires_file_name() {
        assert!(RunContext::new(Path::new("/")).is_err());
    }
}
