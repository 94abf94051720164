//! Utilities for writing tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::block_listener::{BlockEventSource, BlockSender, SubscriptionId};
use crate::events::{BlockNotification, CommitError, CommitEvent, TxValidationCode};
use crate::network::{CommitSender, ListenerId, Network, TransportError};
use crate::options::GatewayOptions;
use crate::peer::{Peer, TransactionId};

#[cfg(test)]
pub(crate) use tokio::test as async_test;

/// Peers named `names`, all of the organization `msp_id`.
pub fn test_peers(msp_id: &str, names: &[&str]) -> Vec<Peer> {
    names.iter().map(|name| Peer::new(*name, msp_id)).collect()
}

#[derive(Debug)]
struct MockListener {
    transaction_id: TransactionId,
    peers: Vec<Peer>,
    sender: Option<CommitSender>,
}

#[derive(Debug, Default)]
struct MockNetworkState {
    next_id: u64,
    listeners: BTreeMap<ListenerId, MockListener>,
    removed: Vec<ListenerId>,
    registration_error: Option<TransportError>,
}

/// In-memory [`Network`] recording commit listener registrations.
///
/// Commits are delivered manually with [`MockNetwork::commit`] and
/// [`MockNetwork::commit_error`].
#[derive(Debug)]
pub struct MockNetwork {
    msp_id: String,
    peers: Vec<Peer>,
    options: GatewayOptions,
    state: Mutex<MockNetworkState>,
}

impl MockNetwork {
    pub fn new(msp_id: &str, peers: Vec<Peer>) -> Self {
        MockNetwork {
            msp_id: msp_id.to_owned(),
            peers,
            options: GatewayOptions::default(),
            state: Mutex::new(MockNetworkState::default()),
        }
    }

    pub fn with_options(mut self, options: GatewayOptions) -> Self {
        self.options = options;
        self
    }

    /// Make every following registration fail with `message`.
    pub fn fail_registrations(&self, message: &str) {
        self.state.lock().expect("lock failed").registration_error =
            Some(TransportError::new(message));
    }

    /// Number of listeners registered and not removed yet.
    pub fn active_listeners(&self) -> usize {
        let state = self.state.lock().expect("lock failed");
        state
            .listeners
            .keys()
            .filter(|id| !state.removed.contains(*id))
            .count()
    }

    /// Number of listeners ever registered.
    pub fn registered_listeners(&self) -> usize {
        self.state.lock().expect("lock failed").listeners.len()
    }

    /// Every removal, in order, including repeated ones.
    pub fn removed_listeners(&self) -> Vec<ListenerId> {
        self.state.lock().expect("lock failed").removed.clone()
    }

    /// Peers of the last listener registered for `transaction_id`.
    pub fn listened_peers(&self, transaction_id: &TransactionId) -> Option<Vec<Peer>> {
        self.state
            .lock()
            .expect("lock failed")
            .listeners
            .values()
            .rev()
            .find(|listener| &listener.transaction_id == transaction_id)
            .map(|listener| listener.peers.clone())
    }

    /// Deliver a commit event of `peer` to the listeners of `transaction_id`.
    pub fn commit(&self, transaction_id: &TransactionId, peer: &Peer, status: TxValidationCode) {
        let event = CommitEvent {
            transaction_id: transaction_id.clone(),
            peer: peer.clone(),
            status,
            block_number: 1,
        };

        for sender in self.senders(transaction_id) {
            sender.send_event(event.clone());
        }
    }

    /// Deliver a transport error of `peer` to the listeners of `transaction_id`.
    pub fn commit_error(&self, transaction_id: &TransactionId, peer: &Peer, message: &str) {
        let error = CommitError {
            peer: peer.clone(),
            cause: TransportError::new(message),
        };

        for sender in self.senders(transaction_id) {
            sender.send_error(error.clone());
        }
    }

    /// Drop the senders of all listeners, as if the transport went away.
    pub fn close_listeners(&self) {
        let mut state = self.state.lock().expect("lock failed");

        for listener in state.listeners.values_mut() {
            listener.sender = None;
        }
    }

    fn senders(&self, transaction_id: &TransactionId) -> Vec<CommitSender> {
        let state = self.state.lock().expect("lock failed");

        state
            .listeners
            .iter()
            .filter(|(id, listener)| {
                &listener.transaction_id == transaction_id && !state.removed.contains(*id)
            })
            .filter_map(|(_, listener)| listener.sender.clone())
            .collect()
    }
}

#[async_trait]
impl Network for MockNetwork {
    fn msp_id(&self) -> &str {
        &self.msp_id
    }

    fn options(&self) -> &GatewayOptions {
        &self.options
    }

    fn endorsing_peers(&self) -> Vec<Peer> {
        self.peers.clone()
    }

    async fn add_commit_listener(
        &self,
        transaction_id: &TransactionId,
        peers: &[Peer],
        sender: CommitSender,
    ) -> Result<ListenerId, TransportError> {
        let mut state = self.state.lock().expect("lock failed");

        if let Some(error) = &state.registration_error {
            return Err(error.clone());
        }

        state.next_id += 1;
        let id = ListenerId::new(state.next_id);

        state.listeners.insert(
            id,
            MockListener {
                transaction_id: transaction_id.clone(),
                peers: peers.to_vec(),
                sender: Some(sender),
            },
        );

        Ok(id)
    }

    fn remove_commit_listener(&self, listener: ListenerId) {
        self.state.lock().expect("lock failed").removed.push(listener);
    }
}

#[derive(Debug, Default)]
struct MockBlockSourceState {
    next_id: u64,
    sender: Option<BlockSender<BlockNotification>>,
    subscribed_start: Option<Option<u64>>,
    unsubscribed: Vec<SubscriptionId>,
    subscription_error: Option<TransportError>,
}

/// In-memory [`BlockEventSource`] delivering blocks manually with
/// [`MockBlockSource::emit`].
#[derive(Debug, Default)]
pub struct MockBlockSource {
    state: Mutex<MockBlockSourceState>,
}

impl MockBlockSource {
    pub fn new() -> Self {
        MockBlockSource::default()
    }

    /// Deliver a block to the current subscription.
    pub fn emit(&self, block: BlockNotification) {
        if let Some(sender) = &self.state.lock().expect("lock failed").sender {
            sender.send(block);
        }
    }

    pub fn emit_all(&self, blocks: impl IntoIterator<Item = BlockNotification>) {
        for block in blocks {
            self.emit(block);
        }
    }

    /// Stop delivering blocks to the current subscription.
    pub fn close(&self) {
        self.state.lock().expect("lock failed").sender = None;
    }

    /// Make every following subscription fail with `message`.
    pub fn fail_subscriptions(&self, message: &str) {
        self.state.lock().expect("lock failed").subscription_error =
            Some(TransportError::new(message));
    }

    /// Start block requested by the last subscription, `None` if there was none.
    pub fn subscribed_start(&self) -> Option<Option<u64>> {
        self.state.lock().expect("lock failed").subscribed_start
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.state.lock().expect("lock failed").unsubscribed.clone()
    }
}

#[async_trait]
impl BlockEventSource for MockBlockSource {
    type Block = BlockNotification;

    async fn subscribe(
        &self,
        start_block: Option<u64>,
        sender: BlockSender<BlockNotification>,
    ) -> Result<SubscriptionId, TransportError> {
        let mut state = self.state.lock().expect("lock failed");

        if let Some(error) = &state.subscription_error {
            return Err(error.clone());
        }

        state.next_id += 1;
        state.sender = Some(sender);
        state.subscribed_start = Some(start_block);

        Ok(SubscriptionId::new(state.next_id))
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        let mut state = self.state.lock().expect("lock failed");

        state.sender = None;
        state.unsubscribed.push(subscription);
    }
}
