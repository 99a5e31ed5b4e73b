//! The processing worker pool.
//!
//! Workers drain a shared queue of observed transactions and drive each
//! message through admission, filtering, attestation polling, Fast Transfer
//! expiration handling, and broadcast. Transient failures requeue the whole
//! transaction up to the configured retry budget; terminal outcomes are
//! `Complete`, `Failed`, and `Filtered`.
//!
//! One pass never holds a message lock across I/O: filter evaluation and
//! state transitions run under the lock, HTTP and broadcast calls run on
//! brief snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attestation::{
    AttestationClient, STATUS_COMPLETE, STATUS_PENDING_CONFIRMATIONS, parse_expiration_block,
};
use crate::chain::{Chain, SequenceMap};
use crate::config::{ApiVersion, CircleSettings, ConfigError};
use crate::filters::FilterRegistry;
use crate::metrics::{RelayerMetrics, status};
use crate::reattest;
use crate::store::MessageStore;
use crate::types::{Domain, MessageStatus, SharedMessage, TxState};

/// Capacity of the shared processing queue. When listeners outpace the
/// workers, sends block: that is the intended backpressure.
pub const PROCESSING_QUEUE_CAPACITY: usize = 10_000;

/// Receiver half of the processing queue, shared by all workers.
pub type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<TxState>>>>;

pub struct Processor {
    store: Arc<MessageStore>,
    registered_domains: Arc<HashMap<Domain, Arc<dyn Chain>>>,
    filters: Arc<FilterRegistry>,
    attestation: Arc<AttestationClient>,
    sequences: Arc<SequenceMap>,
    metrics: Arc<RelayerMetrics>,
    settings: CircleSettings,
    api_version: ApiVersion,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MessageStore>,
        registered_domains: Arc<HashMap<Domain, Arc<dyn Chain>>>,
        filters: Arc<FilterRegistry>,
        attestation: Arc<AttestationClient>,
        sequences: Arc<SequenceMap>,
        metrics: Arc<RelayerMetrics>,
        settings: CircleSettings,
    ) -> Result<Self, ConfigError> {
        let api_version = settings.api_version()?;
        Ok(Self {
            store,
            registered_domains,
            filters,
            attestation,
            sequences,
            metrics,
            settings,
            api_version,
        })
    }

    /// Worker loop: receive, process, repeat until cancellation or queue
    /// closure.
    pub async fn run_worker(
        self: Arc<Self>,
        queue_tx: mpsc::Sender<Arc<TxState>>,
        queue_rx: SharedReceiver,
        cancel: CancellationToken,
    ) {
        loop {
            let dequeued = {
                let mut rx = queue_rx.lock().await;
                tokio::select! {
                    () = cancel.cancelled() => return,
                    received = rx.recv() => match received {
                        Some(tx) => tx,
                        None => return,
                    },
                }
            };

            self.process(dequeued, &queue_tx).await;
        }
    }

    /// One full pass over a dequeued transaction.
    pub async fn process(&self, dequeued: Arc<TxState>, queue_tx: &mpsc::Sender<Arc<TxState>>) {
        // Admission: first sight of this transaction inserts it and counts
        // each message as observed. Racing duplicates converge on the
        // winner's entry.
        let tx = match self.store.load(&dequeued.tx_hash) {
            Some(existing) => existing,
            None => {
                let (tx, inserted) = self.store.store(&dequeued.tx_hash, Arc::clone(&dequeued));
                if inserted {
                    for msg in &tx.msgs {
                        let mut guard = msg.lock();
                        guard.status = MessageStatus::Created;
                        self.metrics.inc_attestation(
                            status::OBSERVED,
                            guard.source_domain,
                            guard.dest_domain,
                        );
                    }
                }
                tx
            }
        };

        let mut broadcast_msgs: HashMap<Domain, Vec<SharedMessage>> = HashMap::new();
        let mut requeue = false;

        for msg in &tx.msgs {
            self.apply_filters(msg);

            let (current_status, iris_lookup_id, source_tx_hash, source_domain, dest_domain, nonce) = {
                let guard = msg.lock();
                (
                    guard.status,
                    guard.iris_lookup_id.clone(),
                    guard.source_tx_hash.clone(),
                    guard.source_domain,
                    guard.dest_domain,
                    guard.nonce,
                )
            };

            // Attestation poll for messages still waiting on a signature.
            if matches!(current_status, MessageStatus::Created | MessageStatus::Pending) {
                let response = self
                    .attestation
                    .check(&iris_lookup_id, &source_tx_hash, source_domain)
                    .await;

                match response {
                    None => {
                        debug!(
                            lookup = %iris_lookup_id,
                            "Attestation is still processing, retrying"
                        );
                        requeue = true;
                        continue;
                    }
                    Some(response)
                        if response.status == STATUS_PENDING_CONFIRMATIONS
                            && current_status == MessageStatus::Created =>
                    {
                        debug!(
                            lookup = %iris_lookup_id,
                            "Attestation is created but still pending confirmations, retrying"
                        );
                        {
                            let mut guard = msg.lock();
                            guard.status = MessageStatus::Pending;
                            guard.updated = Utc::now();
                        }
                        self.metrics
                            .inc_attestation(status::PENDING, source_domain, dest_domain);
                        self.metrics.inc_pending(source_domain, dest_domain);
                        requeue = true;
                        continue;
                    }
                    Some(response) if response.status == STATUS_PENDING_CONFIRMATIONS => {
                        debug!(lookup = %iris_lookup_id, "Attestation is still pending, retrying");
                        requeue = true;
                        continue;
                    }
                    Some(response) if response.status == STATUS_COMPLETE => {
                        debug!(lookup = %iris_lookup_id, "Attestation is complete");
                        {
                            let mut guard = msg.lock();
                            guard.status = MessageStatus::Attested;
                            guard.attestation = Some(response.attestation);
                            guard.updated = Utc::now();
                        }
                        self.metrics
                            .inc_attestation(status::COMPLETE, source_domain, dest_domain);
                        if current_status == MessageStatus::Pending {
                            self.metrics.dec_pending(source_domain, dest_domain);
                        }

                        // Record Fast Transfer expiration details.
                        if self.api_version == ApiVersion::V2 {
                            match self
                                .attestation
                                .v2_message(&source_tx_hash, source_domain)
                                .await
                            {
                                Ok(details) => {
                                    let mut guard = msg.lock();
                                    guard.cctp_version = details.cctp_version;
                                    guard.expiration_block =
                                        parse_expiration_block(&details.expiration_block);
                                }
                                Err(e) => {
                                    debug!(
                                        tx_hash = %source_tx_hash,
                                        error = %e,
                                        "Failed to fetch v2 message details"
                                    );
                                }
                            }
                        }

                        broadcast_msgs
                            .entry(dest_domain)
                            .or_default()
                            .push(Arc::clone(msg));
                    }
                    Some(response) => {
                        error!(
                            lookup = %iris_lookup_id,
                            status = %response.status,
                            "Attestation failed for unknown reason"
                        );
                        self.metrics
                            .inc_attestation(status::FAILED, source_domain, dest_domain);
                    }
                }
            }

            // Fast Transfer expiration handling (v2 only).
            let (is_attested, expiration_block) = {
                let guard = msg.lock();
                (guard.status == MessageStatus::Attested, guard.expiration_block)
            };
            if self.api_version == ApiVersion::V2
                && is_attested
                && expiration_block > 0
                && let Some(dest_chain) = self.registered_domains.get(&dest_domain)
            {
                let (outcome, err) = reattest::handle_expiring(
                    &self.attestation,
                    msg,
                    &self.settings,
                    dest_chain.latest_block(),
                )
                .await;
                if let Some(e) = &err {
                    error!(nonce, error = %e, "Re-attestation handling failed");
                }

                reattest::apply(msg, &outcome);

                if outcome.remove_from_queue {
                    reattest::remove_from_queue(&mut broadcast_msgs, dest_domain, msg);
                    requeue = true;
                    continue;
                }

                if outcome.exhausted_retries {
                    self.metrics
                        .inc_attestation(status::FAILED, source_domain, dest_domain);
                    continue;
                }
            }
        }

        // Broadcast every destination's batch of freshly attested messages.
        for (domain, msgs) in broadcast_msgs {
            let Some(chain) = self.registered_domains.get(&domain) else {
                error!(%domain, "No chain registered for domain");
                continue;
            };

            if let Err(e) = chain
                .broadcast(&msgs, &self.sequences, &self.metrics)
                .await
            {
                error!(
                    error = %e,
                    total_transfers = msgs.len(),
                    chain = chain.name(),
                    %domain,
                    "Unable to mint one or more transfers"
                );
                self.metrics.inc_broadcast_errors(chain.name(), domain);
                requeue = true;
                continue;
            }

            for msg in &msgs {
                let mut guard = msg.lock();
                if guard.status != MessageStatus::Complete {
                    self.metrics.inc_attestation(
                        status::MINTED,
                        guard.source_domain,
                        guard.dest_domain,
                    );
                }
                guard.status = MessageStatus::Complete;
                guard.updated = Utc::now();
            }
        }

        // Requeue within the retry budget; past it, the transaction stays in
        // the store but leaves the queue until a listener re-enqueues it.
        if requeue {
            let attempt = tx.retry_attempt.load(Ordering::Relaxed);
            if attempt < self.settings.fetch_retries {
                tx.retry_attempt.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(Duration::from_secs(self.settings.fetch_retry_interval)).await;
                if queue_tx.send(Arc::clone(&tx)).await.is_err() {
                    warn!(tx = %tx.tx_hash, "Processing queue closed, dropping requeue");
                }
            } else {
                error!(
                    limit = self.settings.fetch_retries,
                    tx = %tx.tx_hash,
                    "Retry limit exceeded for tx"
                );
            }
        }
    }

    fn apply_filters(&self, msg: &SharedMessage) {
        let mut guard = msg.lock();
        let Some(reason) = self.filters.evaluate(&guard) else {
            return;
        };

        // The filtered counter moves only on the first transition, however
        // many times a terminal message gets reprocessed.
        if guard.status != MessageStatus::Filtered {
            self.metrics
                .inc_attestation(status::FILTERED, guard.source_domain, guard.dest_domain);
        }
        guard.status = MessageStatus::Filtered;
        guard.updated = Utc::now();
        info!(tx = %guard.source_tx_hash, %reason, "Message filtered");
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;
    use httpmock::prelude::*;

    use super::*;
    use crate::filters::{DestinationCallerFilter, LowTransferFilter, RouteFilter};
    use crate::test_utils::{MockChain, message, tx_state, valid_burn};
    use crate::types::MessageState;

    struct Harness {
        processor: Arc<Processor>,
        queue_tx: mpsc::Sender<Arc<TxState>>,
        queue_rx: mpsc::Receiver<Arc<TxState>>,
        store: Arc<MessageStore>,
        metrics: Arc<RelayerMetrics>,
        chain: Arc<MockChain>,
    }

    impl Harness {
        fn new(settings: CircleSettings, chain: MockChain, routes: Vec<(Domain, Vec<Domain>)>) -> Self {
            let chain = Arc::new(chain);
            let registered: Arc<HashMap<Domain, Arc<dyn Chain>>> = Arc::new(HashMap::from([(
                chain.domain(),
                Arc::clone(&chain) as Arc<dyn Chain>,
            )]));

            let mut filters = FilterRegistry::new();
            filters.register(Box::new(RouteFilter::new(routes.into_iter().collect())));
            filters.register(Box::new(DestinationCallerFilter::new(
                Arc::clone(&registered),
                false,
            )));
            filters.register(Box::new(LowTransferFilter::new(&HashMap::new())));

            let store = Arc::new(MessageStore::new());
            let metrics = Arc::new(RelayerMetrics::new().unwrap());
            let attestation = Arc::new(AttestationClient::new(&settings).unwrap());
            let (queue_tx, queue_rx) = mpsc::channel(PROCESSING_QUEUE_CAPACITY);

            let processor = Arc::new(
                Processor::new(
                    Arc::clone(&store),
                    registered,
                    Arc::new(filters),
                    attestation,
                    Arc::new(SequenceMap::new()),
                    Arc::clone(&metrics),
                    settings,
                )
                .unwrap(),
            );

            Self {
                processor,
                queue_tx,
                queue_rx,
                store,
                metrics,
                chain,
            }
        }

        async fn process(&self, tx: Arc<TxState>) {
            self.processor.process(tx, &self.queue_tx).await;
        }

        /// Drives a transaction until the queue drains, counting passes.
        async fn drain(&mut self, tx: Arc<TxState>) -> u32 {
            self.queue_tx.send(tx).await.unwrap();
            let mut passes = 0;
            while let Ok(tx) = self.queue_rx.try_recv() {
                passes += 1;
                self.process(tx).await;
            }
            passes
        }

        fn counter(&self, status: &str, src: Domain, dest: Domain) -> f64 {
            self.metrics
                .attestation_total
                .with_label_values(&[status, &src.to_string(), &dest.to_string()])
                .get()
        }

        fn pending_gauge(&self, src: Domain, dest: Domain) -> f64 {
            self.metrics
                .attestation_pending
                .with_label_values(&[&src.to_string(), &dest.to_string()])
                .get()
        }
    }

    fn v1_settings(base_url: &str) -> CircleSettings {
        CircleSettings {
            attestation_base_url: base_url.to_owned(),
            api_version: "v1".to_owned(),
            fetch_retries: 3,
            fetch_retry_interval: 0,
            ..CircleSettings::default()
        }
    }

    fn v2_settings(base_url: &str) -> CircleSettings {
        CircleSettings {
            attestation_base_url: base_url.to_owned(),
            api_version: "v2".to_owned(),
            fetch_retries: 3,
            fetch_retry_interval: 0,
            expiration_buffer_blocks: 100,
            ..CircleSettings::default()
        }
    }

    fn burn_message() -> MessageState {
        message(Domain(0), Domain(4), B256::ZERO, &valid_burn(1_000_000))
    }

    #[tokio::test]
    async fn happy_path_v1_mints_the_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/attestations/0xabc123");
            then.status(200).json_body(serde_json::json!({
                "attestation": "0xdeadbeef",
                "status": "complete"
            }));
        });

        let harness = Harness::new(
            v1_settings(&server.base_url()),
            MockChain::new("noble", Domain(4), 100),
            vec![(Domain(0), vec![Domain(4)])],
        );

        let tx = tx_state("1", vec![burn_message()]);
        harness.process(Arc::clone(&tx)).await;

        let msg = tx.msgs[0].lock();
        assert_eq!(msg.status, MessageStatus::Complete);
        assert_eq!(msg.attestation.as_deref(), Some("0xdeadbeef"));
        assert!(msg.dest_tx_hash.as_deref().unwrap().starts_with("0x"));

        assert_eq!(harness.counter(status::OBSERVED, Domain(0), Domain(4)), 1.0);
        assert_eq!(harness.counter(status::COMPLETE, Domain(0), Domain(4)), 1.0);
        assert_eq!(harness.counter(status::MINTED, Domain(0), Domain(4)), 1.0);
        assert_eq!(harness.counter(status::FILTERED, Domain(0), Domain(4)), 0.0);
    }

    #[tokio::test]
    async fn pending_refines_then_completes() {
        let server = MockServer::start();
        let mut pending = server.mock(|when, then| {
            when.method(GET).path("/attestations/0xabc123");
            then.status(200).json_body(serde_json::json!({
                "attestation": "",
                "status": "pending_confirmations"
            }));
        });

        let harness = Harness::new(
            v1_settings(&server.base_url()),
            MockChain::new("noble", Domain(4), 100),
            vec![(Domain(0), vec![Domain(4)])],
        );

        let tx = tx_state("1", vec![burn_message()]);
        harness.process(Arc::clone(&tx)).await;

        assert_eq!(tx.msgs[0].lock().status, MessageStatus::Pending);
        assert_eq!(harness.counter(status::PENDING, Domain(0), Domain(4)), 1.0);
        assert_eq!(harness.pending_gauge(Domain(0), Domain(4)), 1.0);

        pending.delete();
        server.mock(|when, then| {
            when.method(GET).path("/attestations/0xabc123");
            then.status(200).json_body(serde_json::json!({
                "attestation": "0xdeadbeef",
                "status": "complete"
            }));
        });

        harness.process(Arc::clone(&tx)).await;

        assert_eq!(tx.msgs[0].lock().status, MessageStatus::Complete);
        assert_eq!(harness.pending_gauge(Domain(0), Domain(4)), 0.0);
        // The pending counter is monotonic; only the gauge moves back.
        assert_eq!(harness.counter(status::PENDING, Domain(0), Domain(4)), 1.0);
        assert_eq!(harness.counter(status::MINTED, Domain(0), Domain(4)), 1.0);
    }

    #[tokio::test]
    async fn disabled_route_filters_without_attestation_call() {
        let server = MockServer::start();
        let attestation_mock = server.mock(|when, then| {
            when.method(GET).path_contains("/attestations/");
            then.status(200);
        });

        let harness = Harness::new(
            v1_settings(&server.base_url()),
            MockChain::new("noble", Domain(4), 100),
            vec![(Domain(0), vec![Domain(1), Domain(2)])],
        );

        let tx = tx_state("1", vec![burn_message()]);
        harness.process(Arc::clone(&tx)).await;

        assert_eq!(tx.msgs[0].lock().status, MessageStatus::Filtered);
        assert_eq!(harness.counter(status::FILTERED, Domain(0), Domain(4)), 1.0);
        assert_eq!(attestation_mock.hits(), 0);

        // Reprocessing a filtered message never double-counts.
        harness.process(Arc::clone(&tx)).await;
        assert_eq!(harness.counter(status::FILTERED, Domain(0), Domain(4)), 1.0);
    }

    #[tokio::test]
    async fn absent_attestation_requeues_up_to_the_retry_cap() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path_contains("/attestations/");
            then.status(404);
        });

        let mut settings = v1_settings(&server.base_url());
        settings.fetch_retries = 2;

        let mut harness = Harness::new(
            settings,
            MockChain::new("noble", Domain(4), 100),
            vec![(Domain(0), vec![Domain(4)])],
        );

        let tx = tx_state("1", vec![burn_message()]);
        let passes = harness.drain(Arc::clone(&tx)).await;

        // Initial pass plus two requeues, then dropped from the queue.
        assert_eq!(passes, 3);
        assert_eq!(tx.msgs[0].lock().status, MessageStatus::Created);
        assert_eq!(tx.retry_attempt.load(Ordering::Relaxed), 2);
        // The transaction stays in the store.
        assert!(harness.store.load("1").is_some());
    }

    #[tokio::test]
    async fn unknown_attestation_status_counts_failed_without_requeue() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/attestations/0xabc123");
            then.status(200).json_body(serde_json::json!({
                "attestation": "",
                "status": "confiscated"
            }));
        });

        let mut harness = Harness::new(
            v1_settings(&server.base_url()),
            MockChain::new("noble", Domain(4), 100),
            vec![(Domain(0), vec![Domain(4)])],
        );

        let tx = tx_state("1", vec![burn_message()]);
        let passes = harness.drain(Arc::clone(&tx)).await;

        assert_eq!(passes, 1);
        assert_eq!(tx.msgs[0].lock().status, MessageStatus::Created);
        assert_eq!(harness.counter(status::FAILED, Domain(0), Domain(4)), 1.0);
    }

    #[tokio::test]
    async fn broadcast_error_requeues_and_counts() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/attestations/0xabc123");
            then.status(200).json_body(serde_json::json!({
                "attestation": "0xdeadbeef",
                "status": "complete"
            }));
        });

        let mut harness = Harness::new(
            v1_settings(&server.base_url()),
            MockChain::new("noble", Domain(4), 100).failing_broadcasts(1),
            vec![(Domain(0), vec![Domain(4)])],
        );

        let tx = tx_state("1", vec![burn_message()]);
        let passes = harness.drain(Arc::clone(&tx)).await;

        // Second pass sees an already-attested message and has nothing to
        // broadcast, so the queue drains.
        assert_eq!(passes, 2);
        assert_eq!(harness.chain.broadcast_calls(), 1);
        assert_eq!(tx.msgs[0].lock().status, MessageStatus::Attested);
        assert_eq!(
            harness
                .metrics
                .broadcast_errors
                .with_label_values(&["noble", "4"])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn v2_complete_records_fast_transfer_details() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(200).json_body(serde_json::json!({
                "messages": [{
                    "attestation": "0xsig",
                    "status": "complete",
                    "cctpVersion": "2",
                    "expirationBlock": "5000"
                }]
            }));
        });

        let harness = Harness::new(
            v2_settings(&server.base_url()),
            MockChain::new("noble", Domain(4), 100),
            vec![(Domain(0), vec![Domain(4)])],
        );

        let tx = tx_state("1", vec![burn_message()]);
        harness.process(Arc::clone(&tx)).await;

        let msg = tx.msgs[0].lock();
        assert_eq!(msg.status, MessageStatus::Complete);
        assert_eq!(msg.cctp_version, "2");
        assert_eq!(msg.expiration_block, 5000);
    }

    #[tokio::test]
    async fn expiring_attested_message_is_reattested_on_later_pass() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v2/reattest/0/1");
            then.status(200).json_body(serde_json::json!({
                "attestation": "renewed",
                "status": "complete"
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(200).json_body(serde_json::json!({
                "messages": [{"status": "complete", "expirationBlock": "2000"}]
            }));
        });

        let harness = Harness::new(
            v2_settings(&server.base_url()),
            MockChain::new("noble", Domain(4), 920),
            vec![(Domain(0), vec![Domain(4)])],
        );

        let mut msg = burn_message();
        msg.status = MessageStatus::Attested;
        msg.attestation = Some("0xold".to_owned());
        msg.cctp_version = "2".to_owned();
        msg.expiration_block = 1000;

        let tx = tx_state("1", vec![msg]);
        harness.process(Arc::clone(&tx)).await;

        let msg = tx.msgs[0].lock();
        assert_eq!(msg.status, MessageStatus::Attested);
        assert_eq!(msg.attestation.as_deref(), Some("renewed"));
        assert_eq!(msg.expiration_block, 2000);
        assert_eq!(msg.reattest_count, 1);
        assert!(msg.last_reattest_time.is_some());
    }

    #[tokio::test]
    async fn exhausted_reattestation_fails_the_message() {
        let server = MockServer::start();

        let harness = Harness::new(
            v2_settings(&server.base_url()),
            MockChain::new("noble", Domain(4), 920),
            vec![(Domain(0), vec![Domain(4)])],
        );

        let mut msg = burn_message();
        msg.status = MessageStatus::Attested;
        msg.cctp_version = "2".to_owned();
        msg.expiration_block = 1000;
        msg.reattest_count = 3;

        let tx = tx_state("1", vec![msg]);
        harness.process(Arc::clone(&tx)).await;

        let msg = tx.msgs[0].lock();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.reattest_count, 4);
        drop(msg);
        assert_eq!(harness.counter(status::FAILED, Domain(0), Domain(4)), 1.0);

        // Terminal: the next pass leaves the message alone.
        harness.process(Arc::clone(&tx)).await;
        assert_eq!(tx.msgs[0].lock().status, MessageStatus::Failed);
        assert_eq!(harness.counter(status::FAILED, Domain(0), Domain(4)), 1.0);
    }

    #[tokio::test]
    async fn failed_reattest_request_drops_from_broadcast_and_requeues() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(200).json_body(serde_json::json!({
                "messages": [{
                    "attestation": "0xsig",
                    "status": "complete",
                    "cctpVersion": "2",
                    "expirationBlock": "950"
                }]
            }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/v2/reattest/0/1");
            then.status(503);
        });

        let harness = Harness::new(
            v2_settings(&server.base_url()),
            MockChain::new("noble", Domain(4), 920),
            vec![(Domain(0), vec![Domain(4)])],
        );

        let tx = tx_state("1", vec![burn_message()]);
        harness.process(Arc::clone(&tx)).await;

        // Attested this pass, but the fresh attestation already sits inside
        // the buffer window and re-attestation failed: no broadcast.
        assert_eq!(harness.chain.broadcast_calls(), 0);
        let msg = tx.msgs[0].lock();
        assert_eq!(msg.status, MessageStatus::Attested);
        assert_eq!(msg.reattest_count, 1);
        drop(msg);
        assert_eq!(tx.retry_attempt.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn duplicate_enqueue_converges_on_one_store_entry() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path_contains("/attestations/");
            then.status(404);
        });

        let mut settings = v1_settings(&server.base_url());
        settings.fetch_retries = 0;

        let harness = Harness::new(
            settings,
            MockChain::new("noble", Domain(4), 100),
            vec![(Domain(0), vec![Domain(4)])],
        );

        let first = tx_state("1", vec![burn_message()]);
        let second = tx_state("1", vec![burn_message()]);
        harness.process(first).await;
        harness.process(second).await;

        // One observed count despite two admissions of the same hash.
        assert_eq!(harness.counter(status::OBSERVED, Domain(0), Domain(4)), 1.0);
    }

    #[tokio::test]
    async fn messages_process_in_listed_order_with_partial_outcomes() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/attestations/0xabc123");
            then.status(200).json_body(serde_json::json!({
                "attestation": "0xdeadbeef",
                "status": "complete"
            }));
        });

        let harness = Harness::new(
            v1_settings(&server.base_url()),
            MockChain::new("noble", Domain(4), 100),
            vec![(Domain(0), vec![Domain(4)])],
        );

        // Second message rides a disabled route; first one mints.
        let good = burn_message();
        let bad = message(Domain(9), Domain(4), B256::ZERO, &valid_burn(1_000_000));
        let tx = tx_state("1", vec![good, bad]);
        harness.process(Arc::clone(&tx)).await;

        assert_eq!(tx.msgs[0].lock().status, MessageStatus::Complete);
        assert_eq!(tx.msgs[1].lock().status, MessageStatus::Filtered);
        assert_eq!(harness.counter(status::MINTED, Domain(0), Domain(4)), 1.0);
        assert_eq!(harness.counter(status::FILTERED, Domain(9), Domain(4)), 1.0);
    }

    #[tokio::test]
    async fn worker_pool_drains_the_queue_end_to_end() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/attestations/0xabc123");
            then.status(200).json_body(serde_json::json!({
                "attestation": "0xdeadbeef",
                "status": "complete"
            }));
        });

        let harness = Harness::new(
            v1_settings(&server.base_url()),
            MockChain::new("noble", Domain(4), 100),
            vec![(Domain(0), vec![Domain(4)])],
        );

        let (queue_tx, queue_rx) = mpsc::channel(PROCESSING_QUEUE_CAPACITY);
        let queue_rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let cancel = CancellationToken::new();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                tokio::spawn(Arc::clone(&harness.processor).run_worker(
                    queue_tx.clone(),
                    Arc::clone(&queue_rx),
                    cancel.clone(),
                ))
            })
            .collect();

        let txs: Vec<_> = (0..8)
            .map(|i| tx_state(&i.to_string(), vec![burn_message()]))
            .collect();
        for tx in &txs {
            queue_tx.send(Arc::clone(tx)).await.unwrap();
        }

        // Wait for all messages to reach a terminal state.
        for _ in 0..100 {
            if txs
                .iter()
                .all(|tx| tx.msgs[0].lock().status == MessageStatus::Complete)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for tx in &txs {
            assert_eq!(tx.msgs[0].lock().status, MessageStatus::Complete);
        }

        cancel.cancel();
        for worker in workers {
            worker.await.unwrap();
        }
    }
}
