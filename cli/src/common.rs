use anyhow::Result;
use clap::Parser;

use crate::{blocks, commit};

#[derive(Debug, Parser)]
pub(crate) enum CliArgs {
    /// Submit transactions to a simulated network and wait for their commit
    Commit(commit::Params),
    /// Listen for blocks of a simulated network, in order and from a checkpoint
    Blocks(blocks::Params),
}

/// Run the ledger CLI.
pub async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();

    let _guard = init_tracing();

    match args {
        CliArgs::Commit(args) => commit::run(args).await,
        CliArgs::Blocks(args) => blocks::run(args).await,
    }
}

fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .init();

    guard
}
