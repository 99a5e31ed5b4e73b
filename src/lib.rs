//! Cross-chain message relayer core for Circle's CCTP.
//!
//! Watches source chains for burn events, polls the attestation service for
//! signatures, and broadcasts the corresponding mints on destination
//! chains. Fast Transfers (CCTP v2) carry an attestation that expires at a
//! destination block height; expiring attestations are proactively
//! re-signed before broadcast.
//!
//! Per-chain listeners and broadcasters implement [`chain::Chain`] and live
//! outside this crate; [`launch`] wires everything else: the metrics
//! server, domain registration, height readiness, the filter pipeline, the
//! worker pool, and graceful shutdown.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod allowance;
pub mod attestation;
pub mod chain;
pub mod config;
pub mod filters;
pub mod metrics;
pub mod processor;
pub mod reattest;
pub mod store;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{Config, Env};
pub use telemetry::setup_tracing;

use crate::allowance::start_allowance_monitor;
use crate::attestation::AttestationClient;
use crate::chain::{Chain, SequenceMap};
use crate::filters::build_filters;
use crate::metrics::{RelayerMetrics, spawn_metrics_server};
use crate::processor::{PROCESSING_QUEUE_CAPACITY, Processor, SharedReceiver};
use crate::store::MessageStore;

/// Runs the relayer until ctrl-c. Fatal startup conditions (duplicate
/// domains, unreachable chain heights, invalid API version, filter
/// initialization failures) surface as errors; the embedding binary exits
/// non-zero.
pub async fn launch(config: Config, chains: Vec<Arc<dyn Chain>>) -> anyhow::Result<()> {
    let metrics = Arc::new(RelayerMetrics::new()?);
    let metrics_server = config
        .metrics_address
        .map(|addr| spawn_metrics_server(addr, Arc::clone(&metrics)));

    let registered = Arc::new(chain::register_domains(chains)?);

    for chain in registered.values() {
        info!(
            chain = chain.name(),
            domain = %chain.domain(),
            "Waiting for chain height"
        );
        chain::wait_for_height(chain.as_ref()).await?;
        metrics.set_latest_height(chain.name(), chain.domain(), chain.latest_block());
    }

    let cancel = CancellationToken::new();
    let filters = Arc::new(build_filters(&config, Arc::clone(&registered), &cancel).await?);
    let attestation = Arc::new(AttestationClient::new(&config.circle)?);
    let store = Arc::new(MessageStore::new());
    let sequences = Arc::new(SequenceMap::new());

    let (queue_tx, queue_rx) = mpsc::channel(PROCESSING_QUEUE_CAPACITY);
    let queue_rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(queue_rx));

    let listeners: Vec<_> = registered
        .values()
        .map(|chain| Arc::clone(chain).start_listener(queue_tx.clone(), cancel.child_token()))
        .collect();

    let allowance_monitor = start_allowance_monitor(
        &config.circle,
        Arc::clone(&attestation),
        registered.keys().copied().collect(),
        Arc::clone(&metrics),
        cancel.child_token(),
    );

    let processor = Arc::new(Processor::new(
        store,
        Arc::clone(&registered),
        Arc::clone(&filters),
        attestation,
        sequences,
        Arc::clone(&metrics),
        config.circle.clone(),
    )?);

    let workers: Vec<_> = (0..config.processor_worker_count)
        .map(|_| {
            tokio::spawn(Arc::clone(&processor).run_worker(
                queue_tx.clone(),
                Arc::clone(&queue_rx),
                cancel.clone(),
            ))
        })
        .collect();

    info!(
        workers = config.processor_worker_count,
        domains = registered.len(),
        "Relayer started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, shutting down gracefully...");
    cancel.cancel();

    for listener in listeners {
        listener.abort();
    }
    for worker in workers {
        worker.abort();
    }
    if let Some((_, handle)) = allowance_monitor {
        handle.await.ok();
    }
    if let Some(server) = metrics_server {
        server.abort();
    }

    filters.close();

    for chain in registered.values() {
        info!(
            chain = chain.name(),
            latest_block = chain.latest_block(),
            "Closing chain"
        );
    }

    Ok(())
}
