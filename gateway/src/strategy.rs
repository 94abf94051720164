//! Completion strategies deciding when a transaction is considered committed.
//!
//! A [`CompletionStrategy`] counts successful and failed responses of a fixed
//! set of peers and asks its [`CompletionRule`] whether the counts are decisive.
//! Two rules exist, bounding the two ends of the quorum spectrum:
//!
//! * [`AllForTx`] waits for every peer and succeeds if at least one of them
//!   reported a successful commit.
//! * [`AnyForTx`] succeeds as soon as the first successful commit is reported.
//!
//! Both fail only once every peer responded without a single success.

use std::fmt::Debug;

use tracing::debug;

use crate::peer::Peer;

type Result<T, E = StrategyError> = std::result::Result<T, E>;

/// Errors raised while constructing a strategy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    /// The strategy was given an empty peer set.
    #[error("No peers for strategy")]
    NoPeers,
}

/// Reason of a strategy failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyFailure {
    /// Every peer responded and none of them successfully.
    NoSuccessfulEvents,
}

/// Outcome of a completion check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Not decisive yet.
    Pending,
    Success,
    Failure(StrategyFailure),
}

impl Decision {
    /// Returns `true` if the transaction succeeded or failed.
    pub fn is_decisive(&self) -> bool {
        !matches!(self, Decision::Pending)
    }
}

/// Response counts of a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventCount {
    pub success: u32,
    pub fail: u32,
    pub expected: u32,
}

impl EventCount {
    /// Counts with no responses yet, out of `expected` peers.
    pub fn new(expected: u32) -> EventCount {
        EventCount {
            success: 0,
            fail: 0,
            expected,
        }
    }

    /// Number of peers that responded so far.
    pub fn responded(&self) -> u32 {
        self.success.saturating_add(self.fail)
    }

    /// Returns `true` once every expected peer responded.
    pub fn all_responded(&self) -> bool {
        self.responded() >= self.expected
    }
}

/// Decision rule of a strategy.
pub trait CompletionRule: Debug + Send + Sync {
    fn check_completion(&self, counts: &EventCount) -> Decision;
}

/// Requires a response from every peer and at least one success.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllForTx;

impl CompletionRule for AllForTx {
    fn check_completion(&self, counts: &EventCount) -> Decision {
        if !counts.all_responded() {
            Decision::Pending
        } else if counts.success > 0 {
            Decision::Success
        } else {
            Decision::Failure(StrategyFailure::NoSuccessfulEvents)
        }
    }
}

/// Requires a single success from any of the peers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyForTx;

impl CompletionRule for AnyForTx {
    fn check_completion(&self, counts: &EventCount) -> Decision {
        if counts.success > 0 {
            Decision::Success
        } else if counts.all_responded() {
            Decision::Failure(StrategyFailure::NoSuccessfulEvents)
        } else {
            Decision::Pending
        }
    }
}

/// State of a single transaction's completion, as driven by an event handler.
pub trait Strategy: Debug + Send + 'static {
    /// Peers to listen to. Fixed for the lifetime of the strategy.
    fn peers(&self) -> &[Peer];

    /// Record a successful commit of one peer.
    fn event_received(&mut self) -> Decision;

    /// Record a failure to obtain a commit outcome from one peer.
    fn error_received(&mut self) -> Decision;
}

/// Counting state of a single transaction, bound to a fixed peer set.
///
/// A strategy must not be reused across transactions.
#[derive(Debug)]
pub struct CompletionStrategy {
    peers: Vec<Peer>,
    counts: EventCount,
    rule: Box<dyn CompletionRule>,
    decided: bool,
}

impl CompletionStrategy {
    /// Create a strategy waiting for `peers` and deciding with `rule`.
    pub fn new<R>(peers: Vec<Peer>, rule: R) -> Result<CompletionStrategy>
    where
        R: CompletionRule + 'static,
    {
        if peers.is_empty() {
            return Err(StrategyError::NoPeers);
        }

        let expected = u32::try_from(peers.len()).unwrap_or(u32::MAX);

        Ok(CompletionStrategy {
            peers,
            counts: EventCount::new(expected),
            rule: Box::new(rule),
            decided: false,
        })
    }

    /// Strategy that waits for all peers.
    pub fn all_for_tx(peers: Vec<Peer>) -> Result<CompletionStrategy> {
        CompletionStrategy::new(peers, AllForTx)
    }

    /// Strategy that waits for any peer.
    pub fn any_for_tx(peers: Vec<Peer>) -> Result<CompletionStrategy> {
        CompletionStrategy::new(peers, AnyForTx)
    }

    /// Counts recorded so far.
    pub fn counts(&self) -> &EventCount {
        &self.counts
    }

    fn check_completion(&mut self) -> Decision {
        if self.decided {
            debug!("Strategy already decided, ignoring {:?}", self.counts);
            return Decision::Pending;
        }

        let decision = self.rule.check_completion(&self.counts);
        self.decided = decision.is_decisive();

        decision
    }
}

impl Strategy for CompletionStrategy {
    fn peers(&self) -> &[Peer] {
        &self.peers
    }

    fn event_received(&mut self) -> Decision {
        self.counts.success = self.counts.success.saturating_add(1);
        self.check_completion()
    }

    fn error_received(&mut self) -> Decision {
        self.counts.fail = self.counts.fail.saturating_add(1);
        self.check_completion()
    }
}
