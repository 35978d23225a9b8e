//! Compare an existing generated tree against groundtruth

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::Path;

use nbregress_e2e::{ComparisonReport, NotebookRunner, Outcome};

use super::{load_config, RunOptions};
use crate::output::{print_error, print_list, print_success, print_warning, status_label, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct CompareArgs {
    /// Notebook names (file names, e.g. `demo.ipynb`); every baseline when empty
    pub notebooks: Vec<String>,

    #[command(flatten)]
    pub options: RunOptions,
}

#[derive(Serialize)]
struct EntryRow {
    notebook: String,
    identifier: String,
    file: Option<String>,
    outcome: Outcome,
    failed: bool,
}

impl EntryRow {
    fn rows(report: &ComparisonReport) -> impl Iterator<Item = EntryRow> + '_ {
        report.entries.iter().map(move |entry| EntryRow {
            notebook: report.notebook.clone(),
            identifier: entry.identifier.clone(),
            file: entry.file.clone(),
            outcome: entry.outcome.clone(),
            failed: entry.is_failure(),
        })
    }
}

impl TableDisplay for EntryRow {
    fn headers() -> Vec<&'static str> {
        vec!["Notebook", "Target", "File", "Result", "RMS", "Diff"]
    }

    fn row(&self) -> Vec<String> {
        let (label, rms, diff) = match &self.outcome {
            Outcome::Compared { verdict } => (
                if verdict.passed { "match" } else { "mismatch" }.to_string(),
                verdict.rms.map(|r| format!("{:.3}", r)).unwrap_or_else(|| "-".into()),
                format!("{:.2}%", verdict.diff_percent()),
            ),
            Outcome::TargetNotFound => ("target not found".into(), "-".into(), "-".into()),
            Outcome::FileNotFound => ("file not found".into(), "-".into(), "-".into()),
            Outcome::Error { message } => (message.clone(), "-".into(), "-".into()),
        };

        vec![
            self.notebook.clone(),
            self.identifier.clone(),
            self.file.clone().unwrap_or_else(|| "-".into()),
            status_label(!self.failed, &label),
            rms,
            diff,
        ]
    }
}

pub async fn execute(args: CompareArgs, config_file: Option<&Path>, format: OutputFormat) -> Result<bool> {
    let config = load_config(config_file, &args.options)?;
    let runner = NotebookRunner::with_config(config)?;

    let notebooks = if args.notebooks.is_empty() {
        runner.layout().baseline_notebooks()?
    } else {
        args.notebooks
    };

    let mut reports = Vec::new();
    for name in &notebooks {
        let report = runner.compare_only(name)?;
        if !report.baseline_present {
            print_warning(&format!("No groundtruth for {}", name));
        }
        reports.push(report);
    }

    let rows: Vec<EntryRow> = reports.iter().flat_map(EntryRow::rows).collect();
    print_list(&rows, format);

    let failures: usize = reports.iter().map(|r| r.failures().count()).sum();
    if matches!(format, OutputFormat::Table) {
        if failures == 0 {
            print_success(&format!("{} notebook(s) match groundtruth", reports.len()));
        } else {
            print_error(&format!("{} screenshot(s) differ from groundtruth", failures));
        }
    }

    Ok(failures == 0)
}
