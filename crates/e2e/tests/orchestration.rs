//! Orchestration tests
//!
//! Drive full instrument -> execute -> compare runs against a scratch tree,
//! with a scripted execution engine standing in for nbconvert and a byte
//! comparator standing in for the pixel metric.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use nbregress_common::{Cell, CellType, Notebook};
use nbregress_e2e::{
    E2eError, E2eResult, ExecutionError, ExecutionRequest, Executor, ImageComparator,
    NotebookRunner, Outcome, RunContext, RunState, RunnerConfig, Verdict,
};

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Timeout,
}

/// Engine that "executes" by writing prepared screenshot files
struct ScriptedEngine {
    behavior: Behavior,
    screenshots: Vec<(PathBuf, Vec<u8>)>,
    seen: Arc<Mutex<Vec<(Notebook, ExecutionRequest)>>>,
}

impl ScriptedEngine {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            screenshots: Vec::new(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn producing(mut self, path: PathBuf, bytes: &[u8]) -> Self {
        self.screenshots.push((path, bytes.to_vec()));
        self
    }
}

#[async_trait]
impl Executor for ScriptedEngine {
    async fn run(
        &self,
        notebook: Notebook,
        request: &ExecutionRequest,
    ) -> Result<Notebook, ExecutionError> {
        self.seen.lock().unwrap().push((notebook.clone(), request.clone()));
        match self.behavior {
            Behavior::Succeed => {
                for (path, bytes) in &self.screenshots {
                    std::fs::create_dir_all(path.parent().unwrap())?;
                    std::fs::write(path, bytes)?;
                }
                Ok(notebook)
            }
            Behavior::Fail => Err(ExecutionError::Failed {
                status: "exit status: 1".into(),
                summary: "NameError: name 'sdata' is not defined".into(),
            }),
            Behavior::Timeout => Err(ExecutionError::Timeout(request.timeout)),
        }
    }
}

/// Passes when both files have identical bytes
#[derive(Clone, Default)]
struct ByteComparator {
    calls: Arc<AtomicUsize>,
}

impl ImageComparator for ByteComparator {
    fn compare(&self, expected: &Path, actual: &Path, _tolerance: f64) -> E2eResult<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let passed = std::fs::read(expected)? == std::fs::read(actual)?;
        Ok(Verdict {
            passed,
            rms: Some(if passed { 0.0 } else { 255.0 }),
            diff_pixels: 0,
            total_pixels: 0,
            diff_image_path: None,
            reason: None,
        })
    }
}

struct Fixture {
    dir: TempDir,
    notebook: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let notebook = dir.path().join("test_notebook.ipynb");
        Notebook::new(vec![
            Cell::markdown("# Interactive(sdata) in prose"),
            Cell::code("import spatialdata_plot"),
            Cell::code("a = Interactive(sdata=sdata, headless=True)\nb = Interactive(sdata)"),
            Cell::code("Interactive(sdata, _take_screenshot=False)"),
        ])
        .write(&notebook)
        .unwrap();
        Self { dir, notebook }
    }

    fn root(&self) -> PathBuf {
        self.dir.path().join("tests")
    }

    fn config(&self) -> RunnerConfig {
        RunnerConfig {
            screenshot_root: self.root(),
            working_dir: self.dir.path().to_path_buf(),
            output_dir: self.dir.path().join("results"),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn groundtruth(&self, identifier: &str, file: &str, bytes: &[u8]) {
        let dir = self
            .root()
            .join("groundtruth_screenshots/test_notebook.ipynb")
            .join(identifier);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), bytes).unwrap();
    }

    fn generated_path(&self, identifier: &str, file: &str) -> PathBuf {
        self.root()
            .join("generated_screenshots/test_notebook.ipynb")
            .join(identifier)
            .join(file)
    }
}

#[tokio::test]
async fn full_run_instruments_executes_and_compares() {
    let fx = Fixture::new();
    fx.groundtruth("interactive_1", "view.png", b"png-1");
    fx.groundtruth("interactive_3", "view.png", b"png-3");

    let comparator = ByteComparator::default();
    let calls = comparator.calls.clone();
    let engine = ScriptedEngine::new(Behavior::Succeed)
        .producing(fx.generated_path("interactive_1", "view.png"), b"png-1")
        .producing(fx.generated_path("interactive_3", "view.png"), b"png-3");
    let seen = engine.seen.clone();

    let runner = NotebookRunner::with_config(fx.config())
        .unwrap()
        .with_executor(engine)
        .with_comparator(comparator);

    let report = runner.run(&fx.notebook).await.unwrap();

    assert!(report.success);
    assert_eq!(report.state, RunState::Compared);
    assert_eq!(
        report.targets,
        vec!["interactive_1", "interactive_2", "interactive_3"]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let comparison = report.comparison.unwrap();
    assert!(comparison.baseline_present);
    assert_eq!(comparison.comparisons(), 2);

    // The engine received the instrumented document with the configured limits
    let seen = seen.lock().unwrap();
    let (executed, request) = &seen[0];
    assert_eq!(request.timeout, Duration::from_secs(5));
    assert_eq!(request.notebook_path, fx.notebook);
    assert!(executed.cells[2].source().contains("_test_target=\"interactive_2\""));

    // Persisted notebook: code rewritten, markdown untouched
    let on_disk = Notebook::read(&fx.notebook).unwrap();
    assert_eq!(on_disk.cells.len(), 4);
    assert_eq!(on_disk.cells[0].cell_type(), CellType::Markdown);
    assert_eq!(on_disk.cells[0].source(), "# Interactive(sdata) in prose");
    assert_eq!(on_disk.cells[1].source(), "import spatialdata_plot");
    assert_eq!(
        on_disk.cells[2].source(),
        "a = Interactive(sdata=sdata, headless=True, _tested_notebook=\"test_notebook.ipynb\", _test_target=\"interactive_1\", _take_screenshot=True)\n\
         b = Interactive(sdata, _tested_notebook=\"test_notebook.ipynb\", _test_target=\"interactive_2\", _take_screenshot=True)"
    );
    assert_eq!(
        on_disk.cells[3].source(),
        "Interactive(sdata, _take_screenshot=True, _tested_notebook=\"test_notebook.ipynb\", _test_target=\"interactive_3\")"
    );
}

#[tokio::test]
async fn execution_failure_is_terminal_and_skips_comparison() {
    let fx = Fixture::new();
    fx.groundtruth("interactive_1", "view.png", b"png-1");

    let comparator = ByteComparator::default();
    let calls = comparator.calls.clone();
    let runner = NotebookRunner::with_config(fx.config())
        .unwrap()
        .with_executor(ScriptedEngine::new(Behavior::Fail))
        .with_comparator(comparator);

    let mut ctx = RunContext::new(&fx.notebook).unwrap();
    let mut notebook = Notebook::read(&fx.notebook).unwrap();
    runner.instrument(&mut ctx, &mut notebook).unwrap();
    runner.persist(&mut ctx, &notebook).unwrap();

    let err = runner.execute(&mut ctx, notebook).await.unwrap_err();
    assert!(matches!(
        err,
        E2eError::Execution(ExecutionError::Failed { .. })
    ));
    assert_eq!(ctx.state(), RunState::ExecutionFailed);

    // Comparing after a failed execution is not a valid transition
    assert!(matches!(
        runner.compare(&mut ctx),
        Err(E2eError::InvalidStateTransition { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn timeout_propagates_from_run() {
    let fx = Fixture::new();
    let runner = NotebookRunner::with_config(fx.config())
        .unwrap()
        .with_executor(ScriptedEngine::new(Behavior::Timeout))
        .with_comparator(ByteComparator::default());

    let err = runner.run(&fx.notebook).await.unwrap_err();
    assert!(matches!(
        err,
        E2eError::Execution(ExecutionError::Timeout(d)) if d == Duration::from_secs(5)
    ));
}

#[tokio::test]
async fn missing_generated_target_is_reported_not_compared() {
    let fx = Fixture::new();
    fx.groundtruth("interactive_1", "view.png", b"png-1");

    let comparator = ByteComparator::default();
    let calls = comparator.calls.clone();
    let runner = NotebookRunner::with_config(fx.config())
        .unwrap()
        .with_executor(ScriptedEngine::new(Behavior::Succeed))
        .with_comparator(comparator);

    let report = runner.run(&fx.notebook).await.unwrap();
    let comparison = report.comparison.unwrap();

    assert!(report.success);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(comparison.entries.len(), 1);
    assert_eq!(comparison.entries[0].identifier, "interactive_1");
    assert_eq!(comparison.entries[0].outcome, Outcome::TargetNotFound);
}

#[tokio::test]
async fn mismatches_are_collected() {
    let fx = Fixture::new();
    fx.groundtruth("interactive_1", "a.png", b"expected-a");
    fx.groundtruth("interactive_1", "b.png", b"expected-b");
    fx.groundtruth("interactive_1", "c.png", b"expected-c");
    fx.groundtruth("interactive_2", "a.png", b"same");

    let engine = ScriptedEngine::new(Behavior::Succeed)
        .producing(fx.generated_path("interactive_1", "a.png"), b"changed-a")
        .producing(fx.generated_path("interactive_1", "b.png"), b"changed-b")
        .producing(fx.generated_path("interactive_2", "a.png"), b"same")
        .producing(fx.generated_path("interactive_2", "extra.png"), b"ignored");

    let runner = NotebookRunner::with_config(fx.config())
        .unwrap()
        .with_executor(engine)
        .with_comparator(ByteComparator::default());

    let report = runner.run(&fx.notebook).await.unwrap();
    let comparison = report.comparison.unwrap();

    assert!(!report.success);
    assert_eq!(comparison.comparisons(), 3);

    let failed: Vec<_> = comparison
        .failures()
        .map(|e| e.file.clone().unwrap())
        .collect();
    assert_eq!(failed, vec!["a.png", "b.png"]);

    let missing: Vec<_> = comparison
        .not_found()
        .map(|e| (e.identifier.clone(), e.file.clone()))
        .collect();
    assert_eq!(
        missing,
        vec![("interactive_1".to_string(), Some("c.png".to_string()))]
    );
}

#[tokio::test]
async fn no_groundtruth_means_no_baseline_yet() {
    let fx = Fixture::new();
    let runner = NotebookRunner::with_config(fx.config())
        .unwrap()
        .with_executor(
            ScriptedEngine::new(Behavior::Succeed)
                .producing(fx.generated_path("interactive_1", "view.png"), b"png"),
        )
        .with_comparator(ByteComparator::default());

    let report = runner.run(&fx.notebook).await.unwrap();
    let comparison = report.comparison.unwrap();
    assert!(report.success);
    assert!(!comparison.baseline_present);
    assert!(comparison.entries.is_empty());
}

#[tokio::test]
async fn rerun_restarts_identifiers_and_flips_only_the_flag() {
    let fx = Fixture::new();
    let config = RunnerConfig {
        take_screenshot: false,
        ..fx.config()
    };
    let runner = NotebookRunner::with_config(config)
        .unwrap()
        .with_executor(ScriptedEngine::new(Behavior::Succeed))
        .with_comparator(ByteComparator::default());
    runner.run(&fx.notebook).await.unwrap();
    let first = Notebook::read(&fx.notebook).unwrap();

    let runner = NotebookRunner::with_config(fx.config())
        .unwrap()
        .with_executor(ScriptedEngine::new(Behavior::Succeed))
        .with_comparator(ByteComparator::default());
    let report = runner.run(&fx.notebook).await.unwrap();
    let second = Notebook::read(&fx.notebook).unwrap();

    assert_eq!(report.targets[0], "interactive_1");
    for (before, after) in first.cells.iter().zip(&second.cells) {
        assert_eq!(
            before.source().replace("_take_screenshot=False", "_take_screenshot=True"),
            after.source()
        );
    }
}

#[tokio::test]
async fn run_all_continues_after_failure_and_writes_report() {
    let fx = Fixture::new();
    let missing = fx.dir.path().join("missing.ipynb");
    let runner = NotebookRunner::with_config(fx.config())
        .unwrap()
        .with_executor(ScriptedEngine::new(Behavior::Succeed))
        .with_comparator(ByteComparator::default());

    let suite = runner.run_all(&[missing, fx.notebook.clone()]).await;
    assert_eq!(suite.total, 2);
    assert_eq!(suite.passed, 1);
    assert_eq!(suite.failed, 1);
    assert_eq!(suite.results[0].state, RunState::Loaded);
    assert!(suite.results[0].error.is_some());
    assert_eq!(suite.results[1].state, RunState::Compared);

    let path = runner.write_report(&suite).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(json["failed"], 1);
    assert_eq!(json["results"][1]["notebook"], "test_notebook.ipynb");
}

#[tokio::test]
async fn run_all_records_execution_failed_state() {
    let fx = Fixture::new();
    let runner = NotebookRunner::with_config(fx.config())
        .unwrap()
        .with_executor(ScriptedEngine::new(Behavior::Fail))
        .with_comparator(ByteComparator::default());

    let suite = runner.run_all(&[fx.notebook.clone()]).await;
    assert_eq!(suite.failed, 1);
    assert_eq!(suite.results[0].state, RunState::ExecutionFailed);
    assert!(suite.results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("NameError"));
}

#[test]
fn instrument_file_only_touches_code_cells() {
    let fx = Fixture::new();
    let runner = NotebookRunner::with_config(fx.config()).unwrap();
    let summary = runner.instrument_file(&fx.notebook).unwrap();

    assert_eq!(summary.cells_modified, 2);
    assert_eq!(summary.targets.len(), 3);

    let nb = Notebook::read(&fx.notebook).unwrap();
    assert_eq!(nb.cells[0].source(), "# Interactive(sdata) in prose");
}
