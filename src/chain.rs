//! Contract between the relayer core and per-chain implementations.
//!
//! Listeners decode chain-native burn events into [`TxState`] values and
//! feed the shared processing queue; broadcasters submit mint transactions.
//! Both live outside this crate. The core consumes only this trait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::RelayerMetrics;
use crate::types::{Domain, SharedMessage, TxState};

/// Attempts to read a nonzero height before startup fails.
const MAX_HEIGHT_ATTEMPTS: u32 = 45;
const HEIGHT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("broadcast failed on {chain}: {source}")]
    Failed {
        chain: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ChainRegistryError {
    #[error("duplicate domain {domain} registered by chain {name}")]
    DuplicateDomain { domain: Domain, name: String },
    #[error("unable to get height for chain {chain}")]
    HeightUnavailable { chain: String },
}

/// A registered chain: source of observed burns and/or destination for
/// mints.
#[async_trait]
pub trait Chain: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn domain(&self) -> Domain;

    /// Latest tracked block height; zero until the first height arrives.
    fn latest_block(&self) -> u64;

    /// Whether this relayer may submit a message with the given destination
    /// caller, plus a printable form of the caller address. The all-zero
    /// caller is permissionless and must return `(true, "")`.
    fn is_destination_caller(&self, caller: &B256) -> (bool, String);

    /// Submits mint transactions for a batch of attested messages. On
    /// success each message's `dest_tx_hash` must be recorded before
    /// returning. Implementations own their inner retry budget; an error
    /// here requeues the whole transaction.
    async fn broadcast(
        &self,
        msgs: &[SharedMessage],
        sequences: &SequenceMap,
        metrics: &RelayerMetrics,
    ) -> Result<(), BroadcastError>;

    /// Starts the listener that decodes burn events into [`TxState`] values
    /// and produces them into the shared processing queue.
    fn start_listener(
        self: Arc<Self>,
        queue: mpsc::Sender<Arc<TxState>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()>;
}

/// Per-domain minter sequence/nonce counters shared with broadcasters.
#[derive(Debug, Default)]
pub struct SequenceMap {
    inner: Mutex<HashMap<Domain, u64>>,
}

impl SequenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, domain: Domain, sequence: u64) {
        self.inner.lock().insert(domain, sequence);
    }

    /// Returns the current sequence for a domain and advances it.
    pub fn next(&self, domain: Domain) -> u64 {
        let mut inner = self.inner.lock();
        let entry = inner.entry(domain).or_insert(0);
        let current = *entry;
        *entry += 1;
        current
    }
}

/// Indexes chains by domain; registering the same domain twice is fatal.
pub fn register_domains(
    chains: Vec<Arc<dyn Chain>>,
) -> Result<HashMap<Domain, Arc<dyn Chain>>, ChainRegistryError> {
    let mut registered: HashMap<Domain, Arc<dyn Chain>> = HashMap::new();

    for chain in chains {
        let domain = chain.domain();
        if registered.contains_key(&domain) {
            return Err(ChainRegistryError::DuplicateDomain {
                domain,
                name: chain.name().to_owned(),
            });
        }
        registered.insert(domain, chain);
    }

    Ok(registered)
}

/// Blocks startup until the chain reports a height.
pub async fn wait_for_height(chain: &dyn Chain) -> Result<(), ChainRegistryError> {
    wait_for_height_with(chain, MAX_HEIGHT_ATTEMPTS, HEIGHT_POLL_INTERVAL).await
}

async fn wait_for_height_with(
    chain: &dyn Chain,
    attempts: u32,
    interval: Duration,
) -> Result<(), ChainRegistryError> {
    for _ in 0..attempts {
        if chain.latest_block() > 0 {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }

    Err(ChainRegistryError::HeightUnavailable {
        chain: chain.name().to_owned(),
    })
}
