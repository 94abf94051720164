//! In-process network standing in for real peers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ledger_gateway::{
    BlockEventSource, BlockNotification, BlockSender, CommitError, CommitEvent, CommitSender,
    GatewayOptions, ListenerId, Network, Peer, SubscriptionId, TransactionId, TransportError,
    TxValidationCode,
};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

/// Randomized behavior of simulated peers.
#[derive(Debug, Clone)]
pub(crate) struct PeerBehavior {
    /// Upper bound of the commit latency of a peer.
    pub(crate) max_latency: Duration,
    /// Probability of a peer failing to report a commit.
    pub(crate) error_rate: f64,
    /// Probability of a peer rejecting a transaction.
    pub(crate) invalid_rate: f64,
    /// Probability of a peer reporting twice.
    pub(crate) duplicate_rate: f64,
}

impl Default for PeerBehavior {
    fn default() -> Self {
        PeerBehavior {
            max_latency: Duration::from_millis(500),
            error_rate: 0.0,
            invalid_rate: 0.0,
            duplicate_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
enum PeerReport {
    Commit(TxValidationCode),
    Failure,
}

/// Channel of simulated organizations and peers.
#[derive(Debug)]
pub(crate) struct SimulatedNetwork {
    msp_id: String,
    peers: Vec<Peer>,
    options: GatewayOptions,
    behavior: PeerBehavior,
    next_id: AtomicU64,
    block_height: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, JoinHandle<()>>>,
}

impl SimulatedNetwork {
    /// Create a channel of `orgs` organizations with `peers_per_org` peers each.
    /// The client belongs to the first organization.
    pub(crate) fn new(
        orgs: usize,
        peers_per_org: usize,
        options: GatewayOptions,
        behavior: PeerBehavior,
    ) -> Self {
        let peers = (1..=orgs)
            .flat_map(|org| {
                (0..peers_per_org)
                    .map(move |peer| Peer::new(format!("peer{peer}.org{org}"), format!("Org{org}MSP")))
            })
            .collect();

        SimulatedNetwork {
            msp_id: "Org1MSP".to_owned(),
            peers,
            options,
            behavior,
            next_id: AtomicU64::new(1),
            block_height: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn plan(&self, peers: &[Peer]) -> Vec<(Duration, Peer, PeerReport)> {
        let mut rng = rand::thread_rng();
        let max_latency = u64::try_from(self.behavior.max_latency.as_millis()).unwrap_or(u64::MAX);
        let mut plan = Vec::with_capacity(peers.len());

        for peer in peers {
            let report = if rng.gen_bool(self.behavior.error_rate) {
                PeerReport::Failure
            } else if rng.gen_bool(self.behavior.invalid_rate) {
                PeerReport::Commit(TxValidationCode::MvccReadConflict)
            } else {
                PeerReport::Commit(TxValidationCode::Valid)
            };

            let latency = Duration::from_millis(rng.gen_range(0..=max_latency));
            plan.push((latency, peer.clone(), report.clone()));

            if rng.gen_bool(self.behavior.duplicate_rate) {
                let latency = Duration::from_millis(rng.gen_range(0..=max_latency));
                plan.push((latency, peer.clone(), report));
            }
        }

        plan.sort_by_key(|(latency, _, _)| *latency);
        plan
    }
}

#[async_trait]
impl Network for SimulatedNetwork {
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
        let id = ListenerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let plan = self.plan(peers);
        let block_number = self.block_height.fetch_add(1, Ordering::Relaxed);
        let transaction_id = transaction_id.clone();

        let task = tokio::spawn(async move {
            let mut elapsed = Duration::ZERO;

            for (latency, peer, report) in plan {
                sleep(latency.saturating_sub(elapsed)).await;
                elapsed = latency;

                trace!("{peer} reports {report:?} for {transaction_id}");

                match report {
                    PeerReport::Commit(status) => sender.send_event(CommitEvent {
                        transaction_id: transaction_id.clone(),
                        peer,
                        status,
                        block_number,
                    }),
                    PeerReport::Failure => sender.send_error(CommitError {
                        peer,
                        cause: TransportError::new("deliver service unavailable"),
                    }),
                }
            }
        });

        self.listeners
            .lock()
            .expect("lock failed")
            .insert(id, task);

        Ok(id)
    }

    fn remove_commit_listener(&self, listener: ListenerId) {
        if let Some(task) = self.listeners.lock().expect("lock failed").remove(&listener) {
            debug!("Stopping {listener}");
            task.abort();
        }
    }
}

/// Randomized behavior of the simulated block delivery.
#[derive(Debug, Clone)]
pub(crate) struct DeliveryBehavior {
    /// Blocks are shuffled within windows of this size.
    pub(crate) window: usize,
    /// Probability of a block being delivered twice.
    pub(crate) duplicate_rate: f64,
    /// Pause between two delivered windows.
    pub(crate) interval: Duration,
}

impl Default for DeliveryBehavior {
    fn default() -> Self {
        DeliveryBehavior {
            window: 4,
            duplicate_rate: 0.1,
            interval: Duration::from_millis(100),
        }
    }
}

/// Source of blocks replaying history and producing new blocks up to a fixed end.
#[derive(Debug)]
pub(crate) struct SimulatedBlockSource {
    height: u64,
    end: u64,
    behavior: DeliveryBehavior,
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
}

impl SimulatedBlockSource {
    /// Source whose chain is at `height`, producing `new_blocks` more blocks.
    pub(crate) fn new(height: u64, new_blocks: u64, behavior: DeliveryBehavior) -> Self {
        SimulatedBlockSource {
            height,
            end: height.saturating_add(new_blocks),
            behavior,
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn delivery(&self, start: u64) -> Vec<Vec<u64>> {
        let mut rng = rand::thread_rng();

        (start..=self.end)
            .collect::<Vec<_>>()
            .chunks(self.behavior.window.max(1))
            .map(|chunk| {
                let mut window = chunk.to_vec();

                for &number in chunk {
                    if rng.gen_bool(self.behavior.duplicate_rate) {
                        window.push(number);
                    }
                }

                window.shuffle(&mut rng);
                window
            })
            .collect()
    }
}

#[async_trait]
impl BlockEventSource for SimulatedBlockSource {
    type Block = BlockNotification;

    async fn subscribe(
        &self,
        start_block: Option<u64>,
        sender: BlockSender<BlockNotification>,
    ) -> Result<SubscriptionId, TransportError> {
        let start = start_block.unwrap_or_else(|| self.height.saturating_add(1));

        if start > self.end.saturating_add(1) {
            return Err(TransportError::new(format!(
                "start block {start} is beyond the chain end {}",
                self.end
            )));
        }

        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let windows = self.delivery(start);
        let interval = self.behavior.interval;

        debug!("{id} replays from block {start} in {} windows", windows.len());

        let task = tokio::spawn(async move {
            for window in windows {
                for number in window {
                    let payload = format!("block {number}").into_bytes();
                    sender.send(BlockNotification::new(number, payload));
                }

                sleep(interval).await;
            }
        });

        self.subscriptions
            .lock()
            .expect("lock failed")
            .insert(id, task);

        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        if let Some(task) = self
            .subscriptions
            .lock()
            .expect("lock failed")
            .remove(&subscription)
        {
            task.abort();
        }
    }
}
