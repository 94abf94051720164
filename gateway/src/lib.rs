#![doc = include_str!("../README.md")]

pub mod block_listener;
pub mod block_queue;
pub mod checkpoint;
pub mod events;
mod executor;
pub mod handler;
pub mod network;
pub mod options;
pub mod peer;
pub mod strategies;
pub mod strategy;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transaction;

pub use crate::block_listener::{
    BlockEventSource, BlockListenerError, BlockListenerOptions, BlockSender, BlockSubscription,
    SubscriptionId,
};
pub use crate::block_queue::OrderedBlockQueue;
pub use crate::checkpoint::{CheckpointError, Checkpointer, FileCheckpointer, InMemoryCheckpointer};
pub use crate::events::{
    BlockEvent, BlockNotification, CommitError, CommitEvent, CommitNotification, TxValidationCode,
};
pub use crate::handler::{
    EventHandlerError, NoOpEventHandler, TransactionEventHandler, TxEventHandler,
};
pub use crate::network::{CommitSender, ListenerId, Network, TransportError};
pub use crate::options::{GatewayOptions, DEFAULT_COMMIT_TIMEOUT};
pub use crate::peer::{Peer, TransactionId};
pub use crate::strategies::{EventStrategy, TxEventHandlerFactory, UnknownEventStrategyError};
pub use crate::strategy::{
    AllForTx, AnyForTx, CompletionRule, CompletionStrategy, Decision, EventCount, Strategy,
    StrategyError,
};
pub use crate::transaction::submit_transaction;

/// Alias for a `Result` with the error type [`ledger_gateway::Error`].
///
/// [`ledger_gateway::Error`]: crate::Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Representation of all the errors that can occur when interacting with [`ledger_gateway`].
///
/// [`ledger_gateway`]: crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    EventHandler(#[from] EventHandlerError),

    #[error(transparent)]
    BlockListener(#[from] BlockListenerError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Submitting the transaction to the orderer failed.
    #[error("Failed to submit transaction {transaction_id}: {message}")]
    Submit {
        transaction_id: TransactionId,
        message: String,
    },
}
