//! Peers of the channel and identifiers of the transactions they validate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A ledger node that validates transactions and notifies about their commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    name: String,
    msp_id: String,
}

impl Peer {
    /// Create a new peer belonging to the organization identified by `msp_id`.
    pub fn new(name: impl Into<String>, msp_id: impl Into<String>) -> Peer {
        Peer {
            name: name.into(),
            msp_id: msp_id.into(),
        }
    }

    /// Name of the peer, stable for its lifetime.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Membership service provider id of the organization owning the peer.
    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Identifier of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> TransactionId {
        TransactionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        TransactionId(id.to_owned())
    }
}

impl From<String> for TransactionId {
    fn from(id: String) -> Self {
        TransactionId(id)
    }
}
