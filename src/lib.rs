pub mod cli;
pub mod core;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::Cli;
use crate::core::sync::{RunOptions, Runner};

pub use crate::core::config::{Config, ConfigError, FeedConfig};
pub use crate::core::sync::{RunError, RunPhase, RunSummary};

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Entry point of the binary: one pass over all configured feeds.
pub fn run() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    let mut runner = Runner::new(RunOptions {
        dry_run: cli.dry_run,
    });
    runtime
        .block_on(runner.run_path(&cli.config))
        .with_context(|| format!("run aborted during {}", runner.phase()))?;
    Ok(())
}
