//! gatehub - orchestration hub for quality and security gates.
//!
//! CLI client for resolving layered configuration, dispatching remote
//! check runs, aggregating evidence into verdicts, and verifying artifact
//! reproducibility.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;
mod executor;
mod inspect;

/// gatehub - orchestration hub for quality and security gates
#[derive(Parser, Debug)]
#[command(name = "gatehub")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the hub manifest
    #[arg(short, long, default_value = "hub.toml")]
    manifest: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve and print the effective configuration for one unit
    Config(commands::config::ConfigArgs),

    /// Dispatch runs for one or all units and wait for the verdict
    Dispatch(commands::dispatch::DispatchArgs),

    /// Re-run aggregation against already-fetched evidence
    Report(commands::report::ReportArgs),

    /// Verify that an artifact builds reproducibly
    Verify(commands::verify::VerifyArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let exit_code = match cli.command {
        Commands::Config(args) => commands::config::run(&cli.manifest, &args)?,
        Commands::Dispatch(args) => {
            runtime.block_on(commands::dispatch::run(&cli.manifest, &args))?
        },
        Commands::Report(args) => commands::report::run(&args)?,
        Commands::Verify(args) => runtime.block_on(commands::verify::run(&args))?,
    };

    // Bypass anyhow Result handling so automation sees the exact code.
    std::process::exit(i32::from(exit_code));
}
