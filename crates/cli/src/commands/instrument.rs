//! Instrument notebooks in place without executing them

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};

use nbregress_e2e::NotebookRunner;

use super::{collect_notebooks, load_config, RunOptions};
use crate::output::{print_list, print_success, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct InstrumentArgs {
    /// Notebooks (or directories of notebooks) to rewrite
    #[arg(required = true)]
    pub notebooks: Vec<PathBuf>,

    #[command(flatten)]
    pub options: RunOptions,
}

#[derive(Serialize)]
struct InstrumentRow {
    notebook: String,
    cells_modified: usize,
    targets: Vec<String>,
}

impl TableDisplay for InstrumentRow {
    fn headers() -> Vec<&'static str> {
        vec!["Notebook", "Cells", "Targets"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.notebook.clone(),
            self.cells_modified.to_string(),
            self.targets.join(", "),
        ]
    }
}

pub async fn execute(args: InstrumentArgs, config_file: Option<&Path>, format: OutputFormat) -> Result<bool> {
    let config = load_config(config_file, &args.options)?;
    let runner = NotebookRunner::with_config(config)?;

    let mut rows = Vec::new();
    for path in collect_notebooks(&args.notebooks)? {
        let summary = runner.instrument_file(&path)?;
        rows.push(InstrumentRow {
            notebook: path.display().to_string(),
            cells_modified: summary.cells_modified,
            targets: summary.targets,
        });
    }

    print_list(&rows, format);
    if matches!(format, OutputFormat::Table) {
        let calls: usize = rows.iter().map(|r| r.targets.len()).sum();
        print_success(&format!("Instrumented {} call(s) in {} notebook(s)", calls, rows.len()));
    }
    Ok(true)
}
