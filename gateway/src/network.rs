//! Interface of the network/channel context the event handlers rely on.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::{CommitError, CommitEvent, CommitNotification};
use crate::options::GatewayOptions;
use crate::peer::{Peer, TransactionId};

/// Error reported by a transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> TransportError {
        TransportError(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Handle of a commit listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new(id: u64) -> ListenerId {
        ListenerId(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Sending half given to the transport when a commit listener is registered.
///
/// Every notification ends up on a single channel consumed by the worker of
/// the registering handler, so the transport may call it from any task.
#[derive(Debug, Clone)]
pub struct CommitSender {
    tx: mpsc::UnboundedSender<CommitNotification>,
}

impl CommitSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<CommitNotification>) -> CommitSender {
        CommitSender { tx }
    }

    /// Forward a notification to the listening handler.
    pub fn send(&self, notification: impl Into<CommitNotification>) {
        // Error is produced if the handler already finished. Late
        // notifications are expected, so we ignore it.
        let _ = self.tx.send(notification.into());
    }

    pub fn send_event(&self, event: CommitEvent) {
        self.send(event);
    }

    pub fn send_error(&self, error: CommitError) {
        self.send(error);
    }

    /// Returns `true` if the handler is not listening anymore.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Network/channel context of a client.
///
/// Provides the topology needed to select peers, the configuration of the
/// client and the transport used to listen for commit notifications.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// Membership service provider id of the client's own organization.
    fn msp_id(&self) -> &str;

    /// Configured options.
    fn options(&self) -> &GatewayOptions;

    /// All endorsing peers of the channel.
    fn endorsing_peers(&self) -> Vec<Peer>;

    /// Endorsing peers of the organization identified by `msp_id`.
    fn endorsing_peers_for_msp(&self, msp_id: &str) -> Vec<Peer> {
        self.endorsing_peers()
            .into_iter()
            .filter(|peer| peer.msp_id() == msp_id)
            .collect()
    }

    /// Register a listener for commit notifications of `transaction_id` on `peers`.
    ///
    /// Notifications must be delivered through `sender`, at most once per peer,
    /// although duplicates are tolerated.
    async fn add_commit_listener(
        &self,
        transaction_id: &TransactionId,
        peers: &[Peer],
        sender: CommitSender,
    ) -> Result<ListenerId, TransportError>;

    /// Remove a listener registration. Removing an unknown listener is a no-op.
    fn remove_commit_listener(&self, listener: ListenerId);
}
