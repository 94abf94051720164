//! Ordered, resumable block event delivery.
//!
//! A [`BlockSubscription`] subscribes to a [`BlockEventSource`], which may
//! deliver blocks in any order and more than once, and hands them out strictly
//! ordered through an [`OrderedBlockQueue`]. With a [`Checkpointer`] the
//! subscription resumes right after the last block the consumer took.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::block_queue::OrderedBlockQueue;
use crate::checkpoint::{CheckpointError, Checkpointer};
use crate::events::BlockEvent;
use crate::network::TransportError;

type Result<T, E = BlockListenerError> = std::result::Result<T, E>;

/// Representation of all the errors that can occur while listening for blocks.
#[derive(Debug, thiserror::Error)]
pub enum BlockListenerError {
    #[error("Failed to subscribe for blocks: {0}")]
    Subscription(#[source] TransportError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The checkpoint is the last possible block.
    #[error("No blocks left to listen to after checkpoint {0}")]
    CheckpointExhausted(u64),
}

/// Handle of a block subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(id: u64) -> SubscriptionId {
        SubscriptionId(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

/// Sending half given to the [`BlockEventSource`] on subscription.
#[derive(Debug)]
pub struct BlockSender<B> {
    tx: mpsc::UnboundedSender<B>,
}

impl<B> Clone for BlockSender<B> {
    fn clone(&self) -> Self {
        BlockSender {
            tx: self.tx.clone(),
        }
    }
}

impl<B> BlockSender<B>
where
    B: BlockEvent,
{
    pub(crate) fn new(tx: mpsc::UnboundedSender<B>) -> Self {
        BlockSender { tx }
    }

    /// Forward a block to the subscription.
    pub fn send(&self, block: B) {
        // Subscription may already be dropped, nothing to do then.
        let _ = self.tx.send(block);
    }

    /// Returns `true` if the subscription is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Transport delivering block events.
///
/// It is responsible for reconnecting and for replaying blocks from the
/// requested start block.
#[async_trait]
pub trait BlockEventSource: Send + Sync + 'static {
    type Block: BlockEvent;

    /// Start delivering blocks through `sender`, from `start_block` if given,
    /// otherwise from the next block committed.
    async fn subscribe(
        &self,
        start_block: Option<u64>,
        sender: BlockSender<Self::Block>,
    ) -> Result<SubscriptionId, TransportError>;

    /// Stop delivering blocks. Unknown subscriptions are ignored.
    fn unsubscribe(&self, subscription: SubscriptionId);
}

/// Options of a block subscription.
#[derive(Clone, Default)]
pub struct BlockListenerOptions {
    /// First block to deliver when there is no checkpoint.
    pub start_block: Option<u64>,
    /// Where to persist the delivered position.
    pub checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl BlockListenerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_block(mut self, start_block: u64) -> Self {
        self.start_block = Some(start_block);
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }
}

impl fmt::Debug for BlockListenerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockListenerOptions")
            .field("start_block", &self.start_block)
            .field("checkpointer", &self.checkpointer.is_some())
            .finish()
    }
}

/// Block listener session.
///
/// Unsubscribes from the source when dropped.
pub struct BlockSubscription<S>
where
    S: BlockEventSource,
{
    source: Arc<S>,
    subscription: SubscriptionId,
    queue: OrderedBlockQueue<S::Block>,
    rx: mpsc::UnboundedReceiver<S::Block>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    /// Block handed out last, checkpointed once the consumer asks for the next one.
    delivered: Option<u64>,
}

impl<S> BlockSubscription<S>
where
    S: BlockEventSource,
{
    /// Subscribe to `source`.
    ///
    /// Blocks are delivered from the checkpoint plus one if the checkpointer has
    /// one, otherwise from the configured start block.
    pub async fn start(source: Arc<S>, options: BlockListenerOptions) -> Result<Self> {
        let start_block = match &options.checkpointer {
            Some(checkpointer) => match checkpointer.block_number().await? {
                Some(checkpoint) => Some(
                    checkpoint
                        .checked_add(1)
                        .ok_or(BlockListenerError::CheckpointExhausted(checkpoint))?,
                ),
                None => options.start_block,
            },
            None => options.start_block,
        };

        let (tx, rx) = mpsc::unbounded_channel();

        let subscription = source
            .subscribe(start_block, BlockSender::new(tx))
            .await
            .map_err(BlockListenerError::Subscription)?;

        match start_block {
            Some(start) => info!("Listening for blocks from {start} with {subscription}"),
            None => info!("Listening for new blocks with {subscription}"),
        }

        Ok(BlockSubscription {
            source,
            subscription,
            queue: OrderedBlockQueue::new(start_block),
            rx,
            checkpointer: options.checkpointer,
            delivered: None,
        })
    }

    /// Wait for the next block in sequence.
    ///
    /// The previously returned block is checkpointed first, so a block is
    /// considered delivered only once the consumer comes back for more.
    /// Returns `None` when the source stopped delivering.
    pub async fn next(&mut self) -> Option<Result<S::Block>> {
        if let Err(e) = self.checkpoint().await {
            return Some(Err(e));
        }

        loop {
            if let Some(block) = self.queue.next_block() {
                self.delivered = Some(block.block_number());
                return Some(Ok(block));
            }

            let Some(block) = self.rx.recv().await else {
                debug!("{} closed", self.subscription);
                return None;
            };

            self.queue.add_block(block);

            // Take whatever else already arrived before releasing anything.
            while let Ok(block) = self.rx.try_recv() {
                self.queue.add_block(block);
            }
        }
    }

    /// Number of the next block to be delivered, if known.
    pub fn next_block_number(&self) -> Option<u64> {
        self.queue.next_block_number()
    }

    pub fn id(&self) -> SubscriptionId {
        self.subscription
    }

    /// Persist the position of the last returned block.
    pub async fn checkpoint(&mut self) -> Result<()> {
        let (Some(checkpointer), Some(block_number)) = (&self.checkpointer, self.delivered) else {
            return Ok(());
        };

        if let Err(e) = checkpointer.set_block_number(block_number).await {
            warn!("Failed to checkpoint block {block_number}: {e}");
            return Err(e.into());
        }

        self.delivered = None;
        Ok(())
    }

    /// Convert into a [`Stream`] of blocks.
    pub fn into_stream(self) -> impl Stream<Item = Result<S::Block>> {
        stream::unfold(self, |mut subscription| async move {
            let item = subscription.next().await?;
            Some((item, subscription))
        })
    }
}

impl<S> fmt::Debug for BlockSubscription<S>
where
    S: BlockEventSource,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockSubscription")
            .field("subscription", &self.subscription)
            .field("next_block_number", &self.queue.next_block_number())
            .field("buffered", &self.queue.len())
            .finish()
    }
}

impl<S> Drop for BlockSubscription<S>
where
    S: BlockEventSource,
{
    fn drop(&mut self) {
        debug!("Dropping {}", self.subscription);
        self.source.unsubscribe(self.subscription);
    }
}
