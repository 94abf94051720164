use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use ledger_gateway::{
    BlockListenerOptions, BlockSubscription, Checkpointer, FileCheckpointer, InMemoryCheckpointer,
};
use tracing::info;

use crate::simulation::{DeliveryBehavior, SimulatedBlockSource};

#[derive(Debug, Parser)]
pub(crate) struct Params {
    /// Current height of the simulated chain.
    #[arg(long, default_value_t = 20)]
    pub(crate) height: u64,

    /// Number of blocks produced after subscribing.
    #[arg(long, default_value_t = 10)]
    pub(crate) new_blocks: u64,

    /// First block to deliver when there is no checkpoint. Defaults to the first new block.
    #[arg(short, long)]
    pub(crate) start: Option<u64>,

    /// Persistent checkpoint path.
    #[arg(short, long)]
    pub(crate) checkpoint: Option<PathBuf>,

    /// Keep the checkpoint in memory only.
    #[arg(long)]
    pub(crate) in_memory_checkpoint: bool,

    /// Blocks are shuffled within windows of this size.
    #[arg(long, default_value_t = 4)]
    pub(crate) window: usize,

    /// Pause between windows, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub(crate) interval_ms: u64,
}

pub(crate) async fn run(args: Params) -> Result<()> {
    let checkpointer = open_checkpointer(&args).await?;

    if let Some(block_number) = checkpointer.block_number().await? {
        info!("Resuming after checkpointed block {block_number}");
    }

    let source = Arc::new(SimulatedBlockSource::new(
        args.height,
        args.new_blocks,
        DeliveryBehavior {
            window: args.window,
            interval: Duration::from_millis(args.interval_ms),
            ..DeliveryBehavior::default()
        },
    ));

    let options = listener_options(&args, checkpointer);

    let mut subscription = BlockSubscription::start(source, options)
        .await
        .context("Failed to start block listener")?;

    let mut delivered = 0u64;

    while let Some(block) = subscription.next().await {
        let block = block?;
        delivered += 1;
        info!(
            "Block {}: {}",
            block.block_number,
            String::from_utf8_lossy(&block.payload)
        );
    }

    info!("Delivered {delivered} blocks");

    Ok(())
}

fn listener_options(args: &Params, checkpointer: Arc<dyn Checkpointer>) -> BlockListenerOptions {
    // Blocks are shuffled on the way, so the queue needs a fixed cursor.
    let start = args.start.unwrap_or_else(|| args.height.saturating_add(1));

    BlockListenerOptions::new()
        .with_start_block(start)
        .with_checkpointer(checkpointer)
}

async fn open_checkpointer(args: &Params) -> Result<Arc<dyn Checkpointer>> {
    if args.in_memory_checkpoint {
        info!("Initializing in-memory checkpoint");
        return Ok(Arc::new(InMemoryCheckpointer::new()));
    }

    let path = match &args.checkpoint {
        Some(path) => path.clone(),
        None => ProjectDirs::from("", "", "ledger-gateway")
            .context("failed to construct project path")?
            .cache_dir()
            .join("blocks.json"),
    };

    info!("Initializing checkpoint {}", path.display());

    let checkpointer = FileCheckpointer::open(&path)
        .await
        .with_context(|| format!("Failed to open checkpoint {}", path.display()))?;

    Ok(Arc::new(checkpointer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(args: &[&str]) -> Params {
        Params::parse_from(std::iter::once("blocks").chain(args.iter().copied()))
    }

    #[tokio::test]
    async fn starts_at_first_new_block() {
        let args = params(&["--height", "20", "--in-memory-checkpoint"]);
        let checkpointer = open_checkpointer(&args).await.unwrap();

        assert_eq!(listener_options(&args, checkpointer).start_block, Some(21));
    }

    #[tokio::test]
    async fn explicit_start() {
        let args = params(&["--height", "20", "--start", "3", "--in-memory-checkpoint"]);
        let checkpointer = open_checkpointer(&args).await.unwrap();

        assert_eq!(listener_options(&args, checkpointer).start_block, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn no_new_block_is_skipped() {
        let args = params(&[
            "--height",
            "20",
            "--new-blocks",
            "12",
            "--window",
            "5",
            "--in-memory-checkpoint",
        ]);
        let checkpointer = open_checkpointer(&args).await.unwrap();
        let source = Arc::new(SimulatedBlockSource::new(
            args.height,
            args.new_blocks,
            DeliveryBehavior {
                window: args.window,
                interval: Duration::from_millis(10),
                ..DeliveryBehavior::default()
            },
        ));

        let mut subscription =
            BlockSubscription::start(source, listener_options(&args, checkpointer))
                .await
                .unwrap();
        let mut numbers = Vec::new();

        while let Some(block) = subscription.next().await {
            numbers.push(block.unwrap().block_number);
        }

        assert_eq!(numbers, (21..=32).collect::<Vec<_>>());
    }
}
