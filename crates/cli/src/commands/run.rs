//! Full regression run: instrument, execute, compare, report

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use nbregress_e2e::{NotebookReport, NotebookRunner, RunState};

use super::{collect_notebooks, load_config, RunOptions, DEFAULT_NOTEBOOK};
use crate::output::{
    print_error, print_list, print_success, print_warning, status_label, OutputFormat, TableDisplay,
};

#[derive(Args, Default)]
pub struct RunArgs {
    /// Notebooks (or directories of notebooks) to run
    #[arg(default_value = DEFAULT_NOTEBOOK)]
    pub notebooks: Vec<PathBuf>,

    #[command(flatten)]
    pub options: RunOptions,
}

impl RunArgs {
    /// Arguments of a bare `nbregress` invocation
    pub fn default_run() -> Self {
        Self {
            notebooks: vec![PathBuf::from(DEFAULT_NOTEBOOK)],
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
struct RunRow {
    notebook: String,
    state: RunState,
    success: bool,
    compared: usize,
    failures: usize,
    duration_ms: u64,
    error: Option<String>,
}

impl From<&NotebookReport> for RunRow {
    fn from(report: &NotebookReport) -> Self {
        let (compared, failures) = report
            .comparison
            .as_ref()
            .map(|c| (c.comparisons(), c.failures().count()))
            .unwrap_or((0, 0));

        Self {
            notebook: report.notebook.clone(),
            state: report.state,
            success: report.success,
            compared,
            failures,
            duration_ms: report.duration_ms,
            error: report.error.clone(),
        }
    }
}

impl TableDisplay for RunRow {
    fn headers() -> Vec<&'static str> {
        vec!["Notebook", "Result", "State", "Compared", "Failures", "Duration", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.notebook.clone(),
            status_label(self.success, if self.success { "pass" } else { "fail" }),
            format!("{:?}", self.state),
            self.compared.to_string(),
            self.failures.to_string(),
            format!("{}ms", self.duration_ms),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

pub async fn execute(args: RunArgs, config_file: Option<&Path>, format: OutputFormat) -> Result<bool> {
    let config = load_config(config_file, &args.options)?;
    let runner = NotebookRunner::with_config(config)?;

    let notebooks = collect_notebooks(&args.notebooks)?;
    if notebooks.is_empty() {
        print_warning("No notebooks to run");
        return Ok(true);
    }

    info!(count = notebooks.len(), "Running notebooks");
    let suite = runner.run_all(&notebooks).await;
    let report_path = runner.write_report(&suite)?;

    let rows: Vec<RunRow> = suite.results.iter().map(RunRow::from).collect();
    print_list(&rows, format);

    if matches!(format, OutputFormat::Table) {
        println!("Report: {}", report_path.display());
        if suite.failed == 0 {
            print_success(&format!("{}/{} notebook(s) passed", suite.passed, suite.total));
        } else {
            print_error(&format!("{}/{} notebook(s) failed", suite.failed, suite.total));
        }
    }

    Ok(suite.failed == 0)
}
