//! Per-transaction handlers waiting for the commit of a submitted transaction.
//!
//! A [`TransactionEventHandler`] registers a single commit listener for the peers
//! of its [`Strategy`] and spawns a worker that owns all the mutable state of the
//! transaction. Peer notifications reach the worker through one channel, so they
//! are processed one at a time:
//!
//! 1. A commit with a status other than `VALID` fails the transaction right away,
//!    whatever the strategy would decide.
//! 2. Only the first notification of every peer is counted, anything else is
//!    ignored.
//! 3. The notification is given to the strategy, which eventually decides.
//!
//! The worker races the notifications against the configured commit timeout.
//! Whatever happens first resolves the outcome, which is settled exactly once and
//! can be awaited any number of times with [`TxEventHandler::wait_for_events`].

use std::future::pending;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{CommitNotification, TxValidationCode};
use crate::executor::spawn_cancellable;
use crate::network::{CommitSender, ListenerId, Network, TransportError};
use crate::peer::{Peer, TransactionId};
use crate::strategy::{Decision, Strategy, StrategyError, StrategyFailure};

type Result<T, E = EventHandlerError> = std::result::Result<T, E>;

/// Final outcome of a transaction.
pub type Outcome = Result<()>;

/// Representation of all the errors that can occur while waiting for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventHandlerError {
    /// Strategy could not be created.
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// Transport refused the commit listener.
    #[error("Failed to register commit listener for transaction {transaction_id}: {source}")]
    Registration {
        transaction_id: TransactionId,
        source: TransportError,
    },

    /// A peer rejected the transaction.
    #[error("Commit of transaction {transaction_id} failed on peer {peer} with status code {status}")]
    InvalidCommit {
        transaction_id: TransactionId,
        peer: Peer,
        status: TxValidationCode,
    },

    /// Strategy failed after every peer responded.
    #[error("No successful events received for transaction {transaction_id}")]
    NoSuccessfulEvents { transaction_id: TransactionId },

    /// Strategy was not satisfied in time.
    #[error(
        "Event strategy not satisfied within the timeout period. Transaction ID: {transaction_id}. Peers: {}",
        .peers.join(", ")
    )]
    Timeout {
        transaction_id: TransactionId,
        /// Names of the peers that did not respond.
        peers: Vec<String>,
    },

    /// Listening was cancelled before a decision was made.
    #[error("Listening for transaction {transaction_id} was cancelled")]
    Cancelled { transaction_id: TransactionId },

    #[error("Already listening for transaction {transaction_id}")]
    AlreadyStarted { transaction_id: TransactionId },
}

/// Waits for a submitted transaction to be committed.
#[async_trait]
pub trait TxEventHandler: Send + Sync {
    /// Start listening for the commit. Returns once listening is set up.
    async fn start_listening(&self) -> Result<()>;

    /// Wait until the transaction is committed or failed.
    async fn wait_for_events(&self) -> Result<()>;

    /// Stop listening. Safe to call any number of times.
    fn cancel_listening(&self);
}

/// Handler driving a [`Strategy`] with commit notifications from the network.
pub struct TransactionEventHandler<N>
where
    N: Network,
{
    shared: Arc<Shared<N>>,
    peers: Vec<Peer>,
    commit_timeout: Option<Duration>,
    strategy: Mutex<Option<Box<dyn Strategy>>>,
    cancellation_token: CancellationToken,
}

impl<N> TransactionEventHandler<N>
where
    N: Network,
{
    /// Create a handler for `transaction_id`.
    ///
    /// The commit timeout is read from the options of the `network`.
    pub fn new<S>(transaction_id: TransactionId, network: Arc<N>, strategy: S) -> Self
    where
        S: Strategy,
    {
        let commit_timeout = network.options().commit_timeout;
        let peers = strategy.peers().to_vec();
        let (outcome, _) = watch::channel(None);

        TransactionEventHandler {
            shared: Arc::new(Shared {
                transaction_id,
                network,
                registration: Mutex::new(Registration::Idle),
                outcome,
            }),
            peers,
            commit_timeout,
            strategy: Mutex::new(Some(Box::new(strategy))),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Transaction the handler waits for.
    pub fn transaction_id(&self) -> &TransactionId {
        &self.shared.transaction_id
    }

    /// Peers the handler listens to.
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// Configured commit timeout, `None` meaning no timeout.
    pub fn commit_timeout(&self) -> Option<Duration> {
        self.commit_timeout
    }

    /// Returns the outcome if it was already resolved.
    pub fn outcome(&self) -> Option<Outcome> {
        self.shared.outcome.borrow().clone()
    }
}

#[async_trait]
impl<N> TxEventHandler for TransactionEventHandler<N>
where
    N: Network,
{
    async fn start_listening(&self) -> Result<()> {
        let transaction_id = &self.shared.transaction_id;

        let Some(strategy) = self.strategy.lock().expect("lock failed").take() else {
            return Err(EventHandlerError::AlreadyStarted {
                transaction_id: transaction_id.clone(),
            });
        };

        if self.cancellation_token.is_cancelled() {
            return Err(EventHandlerError::Cancelled {
                transaction_id: transaction_id.clone(),
            });
        }

        if self.peers.is_empty() {
            debug!("No peers to wait for, transaction {transaction_id} is committed");
            self.shared.settle(Ok(()));
            return Ok(());
        }

        // A deadline beyond what `Instant` can represent is never reached.
        let deadline = self
            .commit_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let (tx, rx) = mpsc::unbounded_channel();

        let listener = match self
            .shared
            .network
            .add_commit_listener(transaction_id, &self.peers, CommitSender::new(tx))
            .await
        {
            Ok(listener) => listener,
            Err(e) => {
                let error = EventHandlerError::Registration {
                    transaction_id: transaction_id.clone(),
                    source: e,
                };
                // Nobody should be left waiting for a transaction we can't listen to.
                self.shared.settle(Err(error.clone()));
                return Err(error);
            }
        };

        if !self.shared.register(listener) {
            return Err(EventHandlerError::Cancelled {
                transaction_id: transaction_id.clone(),
            });
        }

        debug!(
            "Listening for commit of transaction {transaction_id} on {} peers with {listener}",
            self.peers.len()
        );

        let worker = Worker {
            shared: self.shared.clone(),
            strategy,
            unresponded: self.peers.clone(),
            rx,
            deadline,
        };

        spawn_cancellable(self.cancellation_token.child_token(), worker.run());

        Ok(())
    }

    async fn wait_for_events(&self) -> Result<()> {
        let mut rx = self.shared.outcome.subscribe();

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .expect("Channel is never closed");

        (*outcome).clone().expect("Outcome is resolved")
    }

    fn cancel_listening(&self) {
        self.cancellation_token.cancel();
        self.shared.release();

        let cancelled = self.shared.settle(Err(EventHandlerError::Cancelled {
            transaction_id: self.shared.transaction_id.clone(),
        }));

        if cancelled {
            debug!(
                "Cancelled listening for transaction {}",
                self.shared.transaction_id
            );
        }
    }
}

impl<N> Drop for TransactionEventHandler<N>
where
    N: Network,
{
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        self.shared.release();
    }
}

/// Handler that doesn't wait for anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpEventHandler;

#[async_trait]
impl TxEventHandler for NoOpEventHandler {
    async fn start_listening(&self) -> Result<()> {
        Ok(())
    }

    async fn wait_for_events(&self) -> Result<()> {
        Ok(())
    }

    fn cancel_listening(&self) {}
}

#[derive(Debug)]
enum Registration {
    Idle,
    Registered(ListenerId),
    Released,
}

/// State shared by the handler and its worker.
struct Shared<N>
where
    N: Network,
{
    transaction_id: TransactionId,
    network: Arc<N>,
    registration: Mutex<Registration>,
    outcome: watch::Sender<Option<Outcome>>,
}

impl<N> Shared<N>
where
    N: Network,
{
    /// Store the registered listener. If the handler was released meanwhile,
    /// the listener is removed right away and `false` is returned.
    fn register(&self, listener: ListenerId) -> bool {
        let mut registration = self.registration.lock().expect("lock failed");

        match *registration {
            Registration::Released => {
                drop(registration);
                self.network.remove_commit_listener(listener);
                false
            }
            _ => {
                *registration = Registration::Registered(listener);
                true
            }
        }
    }

    /// Remove the listener registration. Only the first call has an effect.
    fn release(&self) {
        let previous = mem::replace(
            &mut *self.registration.lock().expect("lock failed"),
            Registration::Released,
        );

        if let Registration::Registered(listener) = previous {
            debug!("Removing {listener} of transaction {}", self.transaction_id);
            self.network.remove_commit_listener(listener);
        }
    }

    /// Resolve the outcome. Returns `false` if it was already resolved.
    fn settle(&self, outcome: Outcome) -> bool {
        self.outcome.send_if_modified(move |current| {
            if current.is_some() {
                return false;
            }

            *current = Some(outcome);
            true
        })
    }

    fn finish(&self, outcome: Outcome) {
        self.release();

        let log_outcome = outcome.clone();

        if !self.settle(outcome) {
            return;
        }

        match log_outcome {
            Ok(()) => info!("Transaction {} committed", self.transaction_id),
            Err(e) => warn!("{e}"),
        }
    }
}

struct Worker<N>
where
    N: Network,
{
    shared: Arc<Shared<N>>,
    strategy: Box<dyn Strategy>,
    unresponded: Vec<Peer>,
    rx: mpsc::UnboundedReceiver<CommitNotification>,
    deadline: Option<Instant>,
}

impl<N> Worker<N>
where
    N: Network,
{
    async fn run(mut self) {
        let deadline = self.deadline;
        let timeout = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending().await,
            }
        };
        tokio::pin!(timeout);

        let mut transport_open = true;

        let outcome = loop {
            select! {
                notification = self.rx.recv(), if transport_open => match notification {
                    Some(notification) => {
                        if let Some(outcome) = self.on_notification(notification) {
                            break outcome;
                        }
                    }
                    None => {
                        warn!(
                            "Transport stopped delivering notifications of transaction {}",
                            self.shared.transaction_id
                        );
                        transport_open = false;
                    }
                },
                _ = &mut timeout => break Err(self.timeout_error()),
            }
        };

        self.shared.finish(outcome);
    }

    fn on_notification(&mut self, notification: CommitNotification) -> Option<Outcome> {
        let transaction_id = &self.shared.transaction_id;

        if let CommitNotification::Event(event) = &notification {
            if !event.is_valid() {
                return Some(Err(EventHandlerError::InvalidCommit {
                    transaction_id: transaction_id.clone(),
                    peer: event.peer.clone(),
                    status: event.status,
                }));
            }
        }

        let peer = notification.peer();

        let Some(idx) = self.unresponded.iter().position(|p| p == peer) else {
            debug!(
                "Ignoring notification of {peer} for transaction {transaction_id}, \
                 already responded or not listened to"
            );
            return None;
        };
        self.unresponded.remove(idx);

        let decision = match notification {
            CommitNotification::Event(event) => {
                debug!(
                    "Transaction {transaction_id} committed on {} in block {}",
                    event.peer, event.block_number
                );
                self.strategy.event_received()
            }
            CommitNotification::Error(error) => {
                warn!(
                    "Commit notification of transaction {transaction_id} failed on {}: {}",
                    error.peer, error.cause
                );
                self.strategy.error_received()
            }
        };

        match decision {
            Decision::Pending => None,
            Decision::Success => Some(Ok(())),
            Decision::Failure(StrategyFailure::NoSuccessfulEvents) => {
                Some(Err(EventHandlerError::NoSuccessfulEvents {
                    transaction_id: transaction_id.clone(),
                }))
            }
        }
    }

    fn timeout_error(&self) -> EventHandlerError {
        EventHandlerError::Timeout {
            transaction_id: self.shared.transaction_id.clone(),
            peers: self
                .unresponded
                .iter()
                .map(|peer| peer.name().to_owned())
                .collect(),
        }
    }
}
