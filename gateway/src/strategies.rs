//! Named event handling presets.
//!
//! A preset pairs a peer selection with a completion rule:
//!
//! | preset                         | peers                                 | rule       |
//! |--------------------------------|---------------------------------------|------------|
//! | `MspidScopeAllForTx`           | organization                          | all        |
//! | `MspidScopeAnyForTx`           | organization                          | any        |
//! | `NetworkScopeAllForTx`         | channel                               | all        |
//! | `NetworkScopeAnyForTx`         | channel                               | any        |
//! | `PreferMspidScopeAllForTx`     | organization, else channel            | all        |
//! | `PreferMspidScopeAnyForTx`     | organization, else channel            | any        |
//! | `None`                         | -                                     | -          |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handler::{EventHandlerError, NoOpEventHandler, TransactionEventHandler, TxEventHandler};
use crate::network::Network;
use crate::peer::{Peer, TransactionId};
use crate::strategy::CompletionStrategy;

/// Preset used to create the event handler of a transaction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStrategy {
    /// Wait for all peers of the client's organization.
    #[default]
    MspidScopeAllForTx,
    /// Wait for any peer of the client's organization.
    MspidScopeAnyForTx,
    /// Wait for all peers of the channel.
    NetworkScopeAllForTx,
    /// Wait for any peer of the channel.
    NetworkScopeAnyForTx,
    /// Wait for all peers of the client's organization, or of the channel if
    /// the organization has no peers.
    PreferMspidScopeAllForTx,
    /// Wait for any peer of the client's organization, or of the channel if
    /// the organization has no peers.
    PreferMspidScopeAnyForTx,
    /// Don't wait for anything.
    None,
}

#[derive(Debug, Error)]
#[error("unknown event strategy {0}")]
pub struct UnknownEventStrategyError(String);

#[derive(Debug, Clone, Copy)]
enum PeerScope {
    Organization,
    Channel,
    PreferOrganization,
}

impl EventStrategy {
    /// All the presets.
    pub const ALL: [EventStrategy; 7] = [
        EventStrategy::MspidScopeAllForTx,
        EventStrategy::MspidScopeAnyForTx,
        EventStrategy::NetworkScopeAllForTx,
        EventStrategy::NetworkScopeAnyForTx,
        EventStrategy::PreferMspidScopeAllForTx,
        EventStrategy::PreferMspidScopeAnyForTx,
        EventStrategy::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStrategy::MspidScopeAllForTx => "mspid_scope_all_for_tx",
            EventStrategy::MspidScopeAnyForTx => "mspid_scope_any_for_tx",
            EventStrategy::NetworkScopeAllForTx => "network_scope_all_for_tx",
            EventStrategy::NetworkScopeAnyForTx => "network_scope_any_for_tx",
            EventStrategy::PreferMspidScopeAllForTx => "prefer_mspid_scope_all_for_tx",
            EventStrategy::PreferMspidScopeAnyForTx => "prefer_mspid_scope_any_for_tx",
            EventStrategy::None => "none",
        }
    }

    /// Create the event handler of `transaction_id`.
    pub fn create_handler<N>(
        self,
        transaction_id: TransactionId,
        network: Arc<N>,
    ) -> Result<Box<dyn TxEventHandler>, EventHandlerError>
    where
        N: Network,
    {
        use PeerScope::{Channel, Organization, PreferOrganization};

        let (scope, wait_for_all) = match self {
            EventStrategy::MspidScopeAllForTx => (Organization, true),
            EventStrategy::MspidScopeAnyForTx => (Organization, false),
            EventStrategy::NetworkScopeAllForTx => (Channel, true),
            EventStrategy::NetworkScopeAnyForTx => (Channel, false),
            EventStrategy::PreferMspidScopeAllForTx => (PreferOrganization, true),
            EventStrategy::PreferMspidScopeAnyForTx => (PreferOrganization, false),
            EventStrategy::None => return Ok(Box::new(NoOpEventHandler)),
        };

        let peers = select_peers(scope, network.as_ref());
        let strategy = if wait_for_all {
            CompletionStrategy::all_for_tx(peers)?
        } else {
            CompletionStrategy::any_for_tx(peers)?
        };

        Ok(Box::new(TransactionEventHandler::new(
            transaction_id,
            network,
            strategy,
        )))
    }
}

fn select_peers<N>(scope: PeerScope, network: &N) -> Vec<Peer>
where
    N: Network + ?Sized,
{
    match scope {
        PeerScope::Organization => network.endorsing_peers_for_msp(network.msp_id()),
        PeerScope::Channel => network.endorsing_peers(),
        PeerScope::PreferOrganization => {
            let peers = network.endorsing_peers_for_msp(network.msp_id());

            if peers.is_empty() {
                network.endorsing_peers()
            } else {
                peers
            }
        }
    }
}

impl fmt::Display for EventStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStrategy {
    type Err = UnknownEventStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownEventStrategyError(s.to_string()))
    }
}

/// Creates event handlers of transactions.
///
/// Implemented by [`EventStrategy`] and by closures, which allows plugging
/// custom strategies.
pub trait TxEventHandlerFactory<N>: Send + Sync
where
    N: Network,
{
    fn create_handler(
        &self,
        transaction_id: TransactionId,
        network: Arc<N>,
    ) -> Result<Box<dyn TxEventHandler>, EventHandlerError>;
}

impl<N> TxEventHandlerFactory<N> for EventStrategy
where
    N: Network,
{
    fn create_handler(
        &self,
        transaction_id: TransactionId,
        network: Arc<N>,
    ) -> Result<Box<dyn TxEventHandler>, EventHandlerError> {
        EventStrategy::create_handler(*self, transaction_id, network)
    }
}

impl<N, F> TxEventHandlerFactory<N> for F
where
    N: Network,
    F: Fn(TransactionId, Arc<N>) -> Result<Box<dyn TxEventHandler>, EventHandlerError>
        + Send
        + Sync,
{
    fn create_handler(
        &self,
        transaction_id: TransactionId,
        network: Arc<N>,
    ) -> Result<Box<dyn TxEventHandler>, EventHandlerError> {
        self(transaction_id, network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TxValidationCode;
    use crate::strategy::StrategyError;
    use crate::test_utils::{async_test, test_peers, MockNetwork};
    use rstest::rstest;

    fn tx_id() -> TransactionId {
        TransactionId::new("tx1")
    }

    fn two_org_network() -> Arc<MockNetwork> {
        let mut peers = test_peers("Org1MSP", &["org1-peer0", "org1-peer1"]);
        peers.extend(test_peers("Org2MSP", &["org2-peer0"]));

        Arc::new(MockNetwork::new("Org1MSP", peers))
    }

    fn org_less_network() -> Arc<MockNetwork> {
        Arc::new(MockNetwork::new(
            "Org3MSP",
            test_peers("Org2MSP", &["org2-peer0", "org2-peer1"]),
        ))
    }

    #[rstest]
    #[case(EventStrategy::MspidScopeAllForTx, &["org1-peer0", "org1-peer1"])]
    #[case(EventStrategy::MspidScopeAnyForTx, &["org1-peer0", "org1-peer1"])]
    #[case(EventStrategy::NetworkScopeAllForTx, &["org1-peer0", "org1-peer1", "org2-peer0"])]
    #[case(EventStrategy::NetworkScopeAnyForTx, &["org1-peer0", "org1-peer1", "org2-peer0"])]
    #[case(EventStrategy::PreferMspidScopeAllForTx, &["org1-peer0", "org1-peer1"])]
    #[case(EventStrategy::PreferMspidScopeAnyForTx, &["org1-peer0", "org1-peer1"])]
    #[tokio::test]
    async fn listens_to_selected_peers(#[case] strategy: EventStrategy, #[case] expected: &[&str]) {
        let network = two_org_network();
        let handler = strategy.create_handler(tx_id(), network.clone()).unwrap();

        handler.start_listening().await.unwrap();

        let names: Vec<_> = network
            .listened_peers(&tx_id())
            .unwrap()
            .iter()
            .map(|peer| peer.name().to_owned())
            .collect();

        assert_eq!(names, expected);
    }

    #[rstest]
    #[case(EventStrategy::MspidScopeAllForTx)]
    #[case(EventStrategy::MspidScopeAnyForTx)]
    fn organization_without_peers(#[case] strategy: EventStrategy) {
        let error = strategy
            .create_handler(tx_id(), org_less_network())
            .err()
            .unwrap();

        assert_eq!(error, EventHandlerError::Strategy(StrategyError::NoPeers));
    }

    #[rstest]
    #[case(EventStrategy::PreferMspidScopeAllForTx)]
    #[case(EventStrategy::PreferMspidScopeAnyForTx)]
    #[tokio::test]
    async fn prefer_organization_falls_back_to_network(#[case] strategy: EventStrategy) {
        let network = org_less_network();
        let handler = strategy.create_handler(tx_id(), network.clone()).unwrap();

        handler.start_listening().await.unwrap();

        assert_eq!(
            network.listened_peers(&tx_id()).unwrap(),
            network.endorsing_peers()
        );
    }

    #[async_test]
    async fn any_preset_decides_on_first_commit() {
        let network = two_org_network();
        let handler = EventStrategy::NetworkScopeAnyForTx
            .create_handler(tx_id(), network.clone())
            .unwrap();

        handler.start_listening().await.unwrap();
        network.commit(&tx_id(), &network.endorsing_peers()[2], TxValidationCode::Valid);

        handler.wait_for_events().await.unwrap();
    }

    #[async_test]
    async fn none_registers_nothing() {
        let network = two_org_network();
        let handler = EventStrategy::None
            .create_handler(tx_id(), network.clone())
            .unwrap();

        handler.start_listening().await.unwrap();
        handler.wait_for_events().await.unwrap();

        assert_eq!(network.registered_listeners(), 0);
    }

    #[async_test]
    async fn closure_factory() {
        let network = two_org_network();
        let factory = |transaction_id: TransactionId, network: Arc<MockNetwork>| {
            let peers = vec![network.endorsing_peers()[1].clone()];
            let strategy = CompletionStrategy::all_for_tx(peers)?;
            let handler: Box<dyn TxEventHandler> =
                Box::new(TransactionEventHandler::new(transaction_id, network, strategy));
            Ok::<_, EventHandlerError>(handler)
        };

        let handler = factory.create_handler(tx_id(), network.clone()).unwrap();
        handler.start_listening().await.unwrap();

        assert_eq!(
            network.listened_peers(&tx_id()).unwrap(),
            vec![network.endorsing_peers()[1].clone()]
        );
    }

    #[test]
    fn parse_and_display() {
        for strategy in EventStrategy::ALL {
            assert_eq!(strategy.to_string().parse::<EventStrategy>().unwrap(), strategy);
        }

        assert_eq!(
            "NETWORK_SCOPE_ANY_FOR_TX".parse::<EventStrategy>().unwrap(),
            EventStrategy::NetworkScopeAnyForTx
        );
        assert!("majority".parse::<EventStrategy>().is_err());
    }

    #[test]
    fn serde_names_match_display() {
        for strategy in EventStrategy::ALL {
            let json = serde_json::to_string(&strategy).unwrap();
            assert_eq!(json, format!("\"{strategy}\""));
        }
    }
}
