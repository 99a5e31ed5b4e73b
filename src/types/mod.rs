//! Core data model: CCTP domains, per-message relay state, and the
//! per-transaction unit of work that flows through the processing queue.

mod burn_message;

pub use burn_message::{BURN_MESSAGE_LEN, BurnMessage, BurnMessageError};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

/// CCTP's 32-bit identifier for a participating chain.
///
/// Deserializes from either an integer value or a string, because TOML table
/// keys (as in `enabled-routes`) always arrive as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Domain(pub u32);

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for Domain {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DomainVisitor;

        impl Visitor<'_> for DomainVisitor {
            type Value = Domain;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a CCTP domain id as integer or string")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Domain, E> {
                let id = u32::try_from(value)
                    .map_err(|_| E::custom(format!("domain id {value} exceeds u32")))?;
                Ok(Domain(id))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Domain, E> {
                let id = u32::try_from(value)
                    .map_err(|_| E::custom(format!("domain id {value} out of range")))?;
                Ok(Domain(id))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Domain, E> {
                value
                    .parse::<u32>()
                    .map(Domain)
                    .map_err(|_| E::custom(format!("invalid domain id {value:?}")))
            }
        }

        deserializer.deserialize_any(DomainVisitor)
    }
}

/// Relay lifecycle of a single CCTP message.
///
/// Transitions are one-way except the `Created` -> `Pending` refinement;
/// `Filtered`, `Complete`, and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Created,
    Pending,
    Attested,
    Filtered,
    Complete,
    Failed,
}

impl MessageStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filtered | Self::Complete | Self::Failed)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Attested => "attested",
            Self::Filtered => "filtered",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// State of one observed burn message, from observation through mint.
///
/// Listeners populate the identity fields and leave `status` / `attestation`
/// for the processor to fill. All field mutation after admission happens
/// under the owning [`SharedMessage`] lock.
#[derive(Debug, Clone)]
pub struct MessageState {
    /// Hex-encoded keccak hash of the MessageSent bytes; the v1 lookup key.
    pub iris_lookup_id: String,
    pub status: MessageStatus,
    /// Hex-encoded attestation once the attestation service signs off.
    pub attestation: Option<String>,
    pub source_domain: Domain,
    pub dest_domain: Domain,
    pub source_tx_hash: String,
    /// Mint transaction hash, recorded by the broadcaster on success.
    pub dest_tx_hash: Option<String>,
    /// Raw bytes of the MessageSent transmitter event.
    pub msg_sent_bytes: Vec<u8>,
    /// Message body carried inside the transmitter message.
    pub msg_body: Vec<u8>,
    /// Address authorized to submit the mint; all zeros means permissionless.
    pub destination_caller: B256,
    pub nonce: u64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    // CCTP v2 / Fast Transfer fields
    pub cctp_version: String,
    /// Destination chain block at which the attestation signature expires.
    /// Zero means no expiration is known (not a Fast Transfer).
    pub expiration_block: u64,
    pub reattest_count: u32,
    pub last_reattest_time: Option<DateTime<Utc>>,
}

impl MessageState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        iris_lookup_id: impl Into<String>,
        source_domain: Domain,
        dest_domain: Domain,
        source_tx_hash: impl Into<String>,
        msg_sent_bytes: Vec<u8>,
        msg_body: Vec<u8>,
        destination_caller: B256,
        nonce: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            iris_lookup_id: iris_lookup_id.into(),
            status: MessageStatus::Created,
            attestation: None,
            source_domain,
            dest_domain,
            source_tx_hash: source_tx_hash.into(),
            dest_tx_hash: None,
            msg_sent_bytes,
            msg_body,
            destination_caller,
            nonce,
            created: now,
            updated: now,
            cctp_version: String::new(),
            expiration_block: 0,
            reattest_count: 0,
            last_reattest_time: None,
        }
    }
}

/// A message shared between the store, the processing queue, and worker-local
/// broadcast buckets. The mutex guards every field write after admission.
pub type SharedMessage = Arc<Mutex<MessageState>>;

/// All messages observed in one source transaction, plus the requeue budget
/// consumed so far. One `TxState` exists per source transaction hash; the
/// store hands every worker the same allocation.
#[derive(Debug)]
pub struct TxState {
    pub tx_hash: String,
    pub msgs: Vec<SharedMessage>,
    /// Requeue attempts consumed; only ever increments.
    pub retry_attempt: AtomicU32,
}

impl TxState {
    pub fn new(tx_hash: impl Into<String>, msgs: Vec<MessageState>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            msgs: msgs.into_iter().map(|m| Arc::new(Mutex::new(m))).collect(),
            retry_attempt: AtomicU32::new(0),
        }
    }
}
