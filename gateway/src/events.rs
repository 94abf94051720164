//! Notifications delivered by peers about committed transactions and blocks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::network::TransportError;
use crate::peer::{Peer, TransactionId};

/// Validation outcome of a transaction as reported by a committing peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum TxValidationCode {
    Valid,
    NilEnvelope,
    BadPayload,
    BadCommonHeader,
    BadCreatorSignature,
    InvalidEndorserTransaction,
    InvalidConfigTransaction,
    UnsupportedTxPayload,
    BadProposalTxid,
    DuplicateTxid,
    EndorsementPolicyFailure,
    MvccReadConflict,
    PhantomReadConflict,
    UnknownTxType,
    TargetChainNotFound,
    MarshalTxError,
    NilTxaction,
    ExpiredChaincode,
    ChaincodeVersionConflict,
    BadHeaderExtension,
    BadChannelHeader,
    BadResponsePayload,
    BadRwset,
    IllegalWriteset,
    InvalidWriteset,
    InvalidChaincode,
    NotValidated,
    InvalidOtherReason,
    /// A code this client doesn't know about. Treated as invalid.
    Unknown(i32),
}

impl TxValidationCode {
    /// Returns `true` only for [`TxValidationCode::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, TxValidationCode::Valid)
    }

    /// Numeric code as transmitted on the wire.
    pub fn code(&self) -> i32 {
        match self {
            TxValidationCode::Valid => 0,
            TxValidationCode::NilEnvelope => 1,
            TxValidationCode::BadPayload => 2,
            TxValidationCode::BadCommonHeader => 3,
            TxValidationCode::BadCreatorSignature => 4,
            TxValidationCode::InvalidEndorserTransaction => 5,
            TxValidationCode::InvalidConfigTransaction => 6,
            TxValidationCode::UnsupportedTxPayload => 7,
            TxValidationCode::BadProposalTxid => 8,
            TxValidationCode::DuplicateTxid => 9,
            TxValidationCode::EndorsementPolicyFailure => 10,
            TxValidationCode::MvccReadConflict => 11,
            TxValidationCode::PhantomReadConflict => 12,
            TxValidationCode::UnknownTxType => 13,
            TxValidationCode::TargetChainNotFound => 14,
            TxValidationCode::MarshalTxError => 15,
            TxValidationCode::NilTxaction => 16,
            TxValidationCode::ExpiredChaincode => 17,
            TxValidationCode::ChaincodeVersionConflict => 18,
            TxValidationCode::BadHeaderExtension => 19,
            TxValidationCode::BadChannelHeader => 20,
            TxValidationCode::BadResponsePayload => 21,
            TxValidationCode::BadRwset => 22,
            TxValidationCode::IllegalWriteset => 23,
            TxValidationCode::InvalidWriteset => 24,
            TxValidationCode::InvalidChaincode => 25,
            TxValidationCode::NotValidated => 254,
            TxValidationCode::InvalidOtherReason => 255,
            TxValidationCode::Unknown(code) => *code,
        }
    }

    fn name(&self) -> Option<&'static str> {
        let name = match self {
            TxValidationCode::Valid => "VALID",
            TxValidationCode::NilEnvelope => "NIL_ENVELOPE",
            TxValidationCode::BadPayload => "BAD_PAYLOAD",
            TxValidationCode::BadCommonHeader => "BAD_COMMON_HEADER",
            TxValidationCode::BadCreatorSignature => "BAD_CREATOR_SIGNATURE",
            TxValidationCode::InvalidEndorserTransaction => "INVALID_ENDORSER_TRANSACTION",
            TxValidationCode::InvalidConfigTransaction => "INVALID_CONFIG_TRANSACTION",
            TxValidationCode::UnsupportedTxPayload => "UNSUPPORTED_TX_PAYLOAD",
            TxValidationCode::BadProposalTxid => "BAD_PROPOSAL_TXID",
            TxValidationCode::DuplicateTxid => "DUPLICATE_TXID",
            TxValidationCode::EndorsementPolicyFailure => "ENDORSEMENT_POLICY_FAILURE",
            TxValidationCode::MvccReadConflict => "MVCC_READ_CONFLICT",
            TxValidationCode::PhantomReadConflict => "PHANTOM_READ_CONFLICT",
            TxValidationCode::UnknownTxType => "UNKNOWN_TX_TYPE",
            TxValidationCode::TargetChainNotFound => "TARGET_CHAIN_NOT_FOUND",
            TxValidationCode::MarshalTxError => "MARSHAL_TX_ERROR",
            TxValidationCode::NilTxaction => "NIL_TXACTION",
            TxValidationCode::ExpiredChaincode => "EXPIRED_CHAINCODE",
            TxValidationCode::ChaincodeVersionConflict => "CHAINCODE_VERSION_CONFLICT",
            TxValidationCode::BadHeaderExtension => "BAD_HEADER_EXTENSION",
            TxValidationCode::BadChannelHeader => "BAD_CHANNEL_HEADER",
            TxValidationCode::BadResponsePayload => "BAD_RESPONSE_PAYLOAD",
            TxValidationCode::BadRwset => "BAD_RWSET",
            TxValidationCode::IllegalWriteset => "ILLEGAL_WRITESET",
            TxValidationCode::InvalidWriteset => "INVALID_WRITESET",
            TxValidationCode::InvalidChaincode => "INVALID_CHAINCODE",
            TxValidationCode::NotValidated => "NOT_VALIDATED",
            TxValidationCode::InvalidOtherReason => "INVALID_OTHER_REASON",
            TxValidationCode::Unknown(_) => return None,
        };

        Some(name)
    }
}

impl From<i32> for TxValidationCode {
    fn from(code: i32) -> Self {
        match code {
            0 => TxValidationCode::Valid,
            1 => TxValidationCode::NilEnvelope,
            2 => TxValidationCode::BadPayload,
            3 => TxValidationCode::BadCommonHeader,
            4 => TxValidationCode::BadCreatorSignature,
            5 => TxValidationCode::InvalidEndorserTransaction,
            6 => TxValidationCode::InvalidConfigTransaction,
            7 => TxValidationCode::UnsupportedTxPayload,
            8 => TxValidationCode::BadProposalTxid,
            9 => TxValidationCode::DuplicateTxid,
            10 => TxValidationCode::EndorsementPolicyFailure,
            11 => TxValidationCode::MvccReadConflict,
            12 => TxValidationCode::PhantomReadConflict,
            13 => TxValidationCode::UnknownTxType,
            14 => TxValidationCode::TargetChainNotFound,
            15 => TxValidationCode::MarshalTxError,
            16 => TxValidationCode::NilTxaction,
            17 => TxValidationCode::ExpiredChaincode,
            18 => TxValidationCode::ChaincodeVersionConflict,
            19 => TxValidationCode::BadHeaderExtension,
            20 => TxValidationCode::BadChannelHeader,
            21 => TxValidationCode::BadResponsePayload,
            22 => TxValidationCode::BadRwset,
            23 => TxValidationCode::IllegalWriteset,
            24 => TxValidationCode::InvalidWriteset,
            25 => TxValidationCode::InvalidChaincode,
            254 => TxValidationCode::NotValidated,
            255 => TxValidationCode::InvalidOtherReason,
            code => TxValidationCode::Unknown(code),
        }
    }
}

impl From<TxValidationCode> for i32 {
    fn from(code: TxValidationCode) -> Self {
        code.code()
    }
}

impl fmt::Display for TxValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "UNKNOWN({})", self.code()),
        }
    }
}

/// A transaction reached a validation outcome on a specific peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
    pub transaction_id: TransactionId,
    pub peer: Peer,
    pub status: TxValidationCode,
    pub block_number: u64,
}

impl CommitEvent {
    pub fn is_valid(&self) -> bool {
        self.status.is_valid()
    }
}

/// The transport failed to obtain a commit outcome from a specific peer.
#[derive(Debug, Clone)]
pub struct CommitError {
    pub peer: Peer,
    pub cause: TransportError,
}

/// A single notification about a transaction, produced once per peer.
#[derive(Debug, Clone)]
pub enum CommitNotification {
    Event(CommitEvent),
    Error(CommitError),
}

impl CommitNotification {
    /// Peer that produced the notification.
    pub fn peer(&self) -> &Peer {
        match self {
            CommitNotification::Event(event) => &event.peer,
            CommitNotification::Error(error) => &error.peer,
        }
    }
}

impl From<CommitEvent> for CommitNotification {
    fn from(event: CommitEvent) -> Self {
        CommitNotification::Event(event)
    }
}

impl From<CommitError> for CommitNotification {
    fn from(error: CommitError) -> Self {
        CommitNotification::Error(error)
    }
}

/// Anything that is delivered per block and knows the number of its block.
pub trait BlockEvent: Send + 'static {
    fn block_number(&self) -> u64;
}

/// A raw block notification: block number plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNotification {
    pub block_number: u64,
    pub payload: Vec<u8>,
}

impl BlockNotification {
    pub fn new(block_number: u64, payload: impl Into<Vec<u8>>) -> BlockNotification {
        BlockNotification {
            block_number,
            payload: payload.into(),
        }
    }
}

impl BlockEvent for BlockNotification {
    fn block_number(&self) -> u64 {
        self.block_number
    }
}
