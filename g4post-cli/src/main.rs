//! g4post command-line interface.
//!
//! Runs a pipeline configuration over every input file it names.
#![allow(clippy::uninlined_format_args)]

use clap::Parser;
use g4post_algorithms::Pipeline;
use g4post_io::{Orchestrator, RunMode};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    G4postIo(#[from] g4post_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] g4post_core::Error),

    #[error("{failed} of {dispatched} file tasks failed")]
    TasksFailed { failed: usize, dispatched: usize },
}

/// Declarative post-processing of ragged simulation records.
#[derive(Parser)]
#[command(name = "g4post")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Pipeline configuration (JSON)
    config: PathBuf,

    /// Validate the configuration and list its steps without processing
    #[arg(long)]
    check: bool,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let orchestrator = Orchestrator::from_file(&cli.config)?;
    if cli.check {
        return check(&orchestrator);
    }

    let params = orchestrator.params();
    log::info!(
        "{}: {} threads, step size {}, mode {:?}",
        cli.config.display(),
        params.threads.max(1),
        params.step_size,
        params.mode
    );

    let start = Instant::now();
    let summary = orchestrator.run()?;
    let elapsed = start.elapsed();

    log::info!(
        "completed {} files, {} already done, {} skipped for missing keys, {} failed in {:.2?}",
        summary.completed.len(),
        summary.skipped_existing.len(),
        summary.missing_key.len(),
        summary.failed.len(),
        elapsed
    );
    for (path, reason) in &summary.failed {
        log::error!("{}: {}", path.display(), reason);
    }
    if let Some(output) = &summary.summary_output {
        log::info!("summary written to {}", output.display());
    }

    if summary.is_success() {
        Ok(())
    } else {
        Err(CliError::TasksFailed {
            failed: summary.failed.len(),
            dispatched: summary.dispatched(),
        })
    }
}

/// Builds the pipeline once so geometry files are checked too.
fn check(orchestrator: &Orchestrator) -> Result<()> {
    let config = orchestrator.config();
    let instructions = config.instructions()?;
    let pipeline = Pipeline::new(&instructions, &g4post_algorithms::GeometryRegistry::new())?;
    let inputs = orchestrator.inputs()?;

    println!("Configuration OK");
    println!(
        "  Inputs:  {} {} files in {}",
        inputs.len(),
        config.io.input.format.extension(),
        config.io.input.folder.display()
    );
    match orchestrator.params().mode {
        RunMode::PerFile => println!("  Output:  {}/<stem>.hdf5", config.io.output.display()),
        RunMode::Summarize => println!("  Output:  {} (merged)", config.io.output.display()),
    }
    println!("  Steps:");
    for step in pipeline.steps() {
        println!("    {:<24} {}", step.name(), step.kind());
    }
    println!("  Writes:  {}", config.output.join(", "));
    Ok(())
}
