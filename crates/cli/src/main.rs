//! nbregress CLI - Main Entry Point
//!
//! Instruments notebooks, executes them headlessly and compares the
//! screenshots they produce against groundtruth.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{baselines, compare, instrument, run};

/// nbregress - notebook screenshot regression runner
#[derive(Parser)]
#[command(name = "nbregress")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// YAML runner configuration
    #[arg(long, global = true, env = "NBREGRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite designated calls in place without executing
    Instrument(instrument::InstrumentArgs),

    /// Instrument, execute and compare notebooks
    Run(run::RunArgs),

    /// Compare generated screenshots against groundtruth
    Compare(compare::CompareArgs),

    /// Promote generated screenshots to groundtruth
    Baselines(baselines::BaselinesArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let passed = match cli.command {
        Some(Commands::Instrument(args)) => instrument::execute(args, config, cli.format).await?,
        Some(Commands::Run(args)) => run::execute(args, config, cli.format).await?,
        Some(Commands::Compare(args)) => compare::execute(args, config, cli.format).await?,
        Some(Commands::Baselines(args)) => baselines::execute(args, config, cli.format).await?,
        None => run::execute(run::RunArgs::default_run(), config, cli.format).await?,
    };

    if !passed {
        std::process::exit(1);
    }

    Ok(())
}
