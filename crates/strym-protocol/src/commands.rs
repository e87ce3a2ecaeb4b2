//! Protocol commands exchanged between producers and brokers.

use crate::metadata::MessageMetadata;
use crate::serde_utils::bytes_serde;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Broker-side error codes carried in [`Command::Error`].
///
/// The variant order is wire-significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerErrorCode {
    UnknownError,
    /// Storage-layer write failure; transient.
    PersistenceError,
    /// Broker is starting up or shedding load; transient.
    ServiceNotReady,
    TooManyRequests,
    /// Producer is blocked because the topic backlog quota is exhausted;
    /// the broker may unblock later.
    BacklogQuotaBlocked,
    /// Backlog quota exhausted and the policy rejects the producer outright.
    BacklogQuotaExceeded,
    TopicNotFound,
    AuthorizationError,
}

impl ServerErrorCode {
    /// Whether a producer-create failure with this code is worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::PersistenceError
                | Self::ServiceNotReady
                | Self::TooManyRequests
                | Self::BacklogQuotaBlocked
        )
    }
}

/// A single wire command.
///
/// The variant order is wire-significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Publish one send operation (one or many application messages).
    Send {
        producer_id: u64,
        sequence_id: u64,
        num_messages: u32,
        metadata: MessageMetadata,
        #[serde(with = "bytes_serde")]
        payload: Bytes,
    },
    /// Broker acknowledgement for a [`Command::Send`].
    SendReceipt {
        producer_id: u64,
        sequence_id: u64,
        ledger_id: u64,
        entry_id: u64,
    },
    /// Register a producer on this connection.
    Producer {
        topic: String,
        producer_id: u64,
        request_id: u64,
        /// Present on re-registration after a reconnect; the broker keeps the
        /// name stable across connections.
        producer_name: Option<String>,
    },
    /// Successful producer registration; carries the definitive name.
    ProducerSuccess {
        request_id: u64,
        producer_name: String,
    },
    CloseProducer {
        producer_id: u64,
        request_id: u64,
    },
    Success {
        request_id: u64,
    },
    Error {
        request_id: u64,
        code: ServerErrorCode,
        message: String,
    },
    Ping,
    Pong,
}

impl Command {
    /// Request id for request/response correlation, if this command has one.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Command::Producer { request_id, .. }
            | Command::ProducerSuccess { request_id, .. }
            | Command::CloseProducer { request_id, .. }
            | Command::Success { request_id }
            | Command::Error { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}
