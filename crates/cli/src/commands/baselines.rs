//! Promote generated screenshots to groundtruth

use anyhow::Result;
use clap::Args;
use std::path::Path;
use tracing::info;

use nbregress_e2e::promote_baselines;

use super::{load_config, RunOptions};
use crate::output::{print_success, print_warning, OutputFormat};

#[derive(Args)]
pub struct BaselinesArgs {
    /// Notebook names whose generated screenshots become the new baseline
    #[arg(required = true)]
    pub notebooks: Vec<String>,

    #[command(flatten)]
    pub options: RunOptions,
}

pub async fn execute(args: BaselinesArgs, config_file: Option<&Path>, format: OutputFormat) -> Result<bool> {
    let config = load_config(config_file, &args.options)?;
    let layout = nbregress_e2e::ScreenshotLayout::new(&config.screenshot_root);

    let mut total = 0;
    for name in &args.notebooks {
        let copied = promote_baselines(&layout, name)?;
        info!(notebook = %name, copied, "Promoted screenshots");
        if copied == 0 {
            print_warning(&format!("No generated screenshots for {}", name));
        }
        total += copied;
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "promoted": total })),
        _ => print_success(&format!("Promoted {} screenshot(s)", total)),
    }
    Ok(true)
}
