//! Shared test fixtures: a scriptable mock chain and message builders.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use alloy_primitives::{B256, U256, b256};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chain::{BroadcastError, Chain, SequenceMap};
use crate::metrics::RelayerMetrics;
use crate::types::{BurnMessage, Domain, MessageState, SharedMessage, TxState};

pub(crate) const TEST_SENDER: B256 =
    b256!("000000000000000000000000bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");

/// Encodes a valid burn message body with the given amount.
pub(crate) fn valid_burn(amount: u64) -> Vec<u8> {
    valid_burn_from(amount, TEST_SENDER)
}

pub(crate) fn valid_burn_from(amount: u64, message_sender: B256) -> Vec<u8> {
    BurnMessage {
        version: 0,
        burn_token: b256!("0000000000000000000000001111111111111111111111111111111111111111"),
        mint_recipient: b256!(
            "000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        ),
        amount: U256::from(amount),
        message_sender,
    }
    .encode()
}

/// Builds a listener-shaped message: identity fields set, status left at
/// `Created` for the processor.
pub(crate) fn message(
    source_domain: Domain,
    dest_domain: Domain,
    destination_caller: B256,
    msg_body: &[u8],
) -> MessageState {
    MessageState::new(
        "abc123",
        source_domain,
        dest_domain,
        "0x1",
        msg_body.to_vec(),
        msg_body.to_vec(),
        destination_caller,
        1,
    )
}

pub(crate) fn tx_state(tx_hash: &str, msgs: Vec<MessageState>) -> Arc<TxState> {
    Arc::new(TxState::new(tx_hash, msgs))
}

/// Scriptable [`Chain`] double. Broadcast failures can be injected; on
/// success each message gets a synthetic mint transaction hash, as the
/// broadcaster contract requires.
#[derive(Debug)]
pub(crate) struct MockChain {
    name: String,
    domain: Domain,
    latest_block: AtomicU64,
    minter: Option<B256>,
    failures_remaining: AtomicU32,
    broadcast_calls: AtomicU32,
}

impl MockChain {
    pub(crate) fn new(name: &str, domain: Domain, latest_block: u64) -> Self {
        Self {
            name: name.to_owned(),
            domain,
            latest_block: AtomicU64::new(latest_block),
            minter: None,
            failures_remaining: AtomicU32::new(0),
            broadcast_calls: AtomicU32::new(0),
        }
    }

    /// Designated caller this chain's relayer key corresponds to.
    pub(crate) fn with_minter(mut self, minter: B256) -> Self {
        self.minter = Some(minter);
        self
    }

    /// Fails the next `times` broadcast calls before succeeding.
    pub(crate) fn failing_broadcasts(self, times: u32) -> Self {
        self.failures_remaining.store(times, Ordering::Relaxed);
        self
    }

    pub(crate) fn set_latest_block(&self, block: u64) {
        self.latest_block.store(block, Ordering::Relaxed);
    }

    pub(crate) fn broadcast_calls(&self) -> u32 {
        self.broadcast_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Chain for MockChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn domain(&self) -> Domain {
        self.domain
    }

    fn latest_block(&self) -> u64 {
        self.latest_block.load(Ordering::Relaxed)
    }

    fn is_destination_caller(&self, caller: &B256) -> (bool, String) {
        if caller.is_zero() {
            return (true, String::new());
        }
        let printable = format!("{caller:#x}");
        match self.minter {
            Some(minter) if *caller == minter => (true, printable),
            _ => (false, printable),
        }
    }

    async fn broadcast(
        &self,
        msgs: &[SharedMessage],
        sequences: &SequenceMap,
        _metrics: &RelayerMetrics,
    ) -> Result<(), BroadcastError> {
        self.broadcast_calls.fetch_add(1, Ordering::Relaxed);

        if self
            .failures_remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BroadcastError::Failed {
                chain: self.name.clone(),
                source: "simulated broadcast failure".into(),
            });
        }

        for msg in msgs {
            let sequence = sequences.next(self.domain);
            let mut guard = msg.lock();
            guard.dest_tx_hash = Some(format!("0xmint{:08x}{sequence}", guard.nonce));
        }

        Ok(())
    }

    fn start_listener(
        self: Arc<Self>,
        _queue: mpsc::Sender<Arc<TxState>>,
        _cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async {})
    }
}
