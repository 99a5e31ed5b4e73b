//! Prometheus metrics for the relayer core.
//!
//! [`RelayerMetrics`] owns its registry and is passed to every component
//! that records observations; there is no global registry. The `/metrics`
//! endpoint is served by a plain hyper HTTP/1 server when a metrics address
//! is configured.

use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::types::Domain;

/// Attestation counter status labels.
pub mod status {
    pub const OBSERVED: &str = "observed";
    pub const FILTERED: &str = "filtered";
    pub const PENDING: &str = "pending";
    pub const COMPLETE: &str = "complete";
    pub const FAILED: &str = "failed";
    pub const MINTED: &str = "minted";
}

pub struct RelayerMetrics {
    registry: Registry,
    pub(crate) attestation_total: CounterVec,
    pub(crate) attestation_pending: GaugeVec,
    pub(crate) fast_transfer_allowance: GaugeVec,
    pub(crate) broadcast_errors: CounterVec,
    pub(crate) latest_height: GaugeVec,
    pub(crate) wallet_balance: GaugeVec,
}

impl RelayerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let attestation_total = CounterVec::new(
            Opts::new(
                "attestation_total",
                "Attestation state transitions: observed, filtered, pending, complete, failed, minted",
            ),
            &["status", "src_domain", "dest_domain"],
        )?;
        let attestation_pending = GaugeVec::new(
            Opts::new(
                "attestation_pending",
                "Number of attestations currently pending confirmations",
            ),
            &["src_domain", "dest_domain"],
        )?;
        let fast_transfer_allowance = GaugeVec::new(
            Opts::new(
                "fast_transfer_allowance",
                "Remaining Fast Transfer allowance per domain (v2 only)",
            ),
            &["domain", "token"],
        )?;
        let broadcast_errors = CounterVec::new(
            Opts::new(
                "broadcast_errors_total",
                "Failed mint broadcasts, counted after the broadcaster's inner retries",
            ),
            &["chain", "domain"],
        )?;
        let latest_height = GaugeVec::new(
            Opts::new("latest_height", "Latest observed block height per chain"),
            &["chain", "domain"],
        )?;
        let wallet_balance = GaugeVec::new(
            Opts::new("wallet_balance", "Current balance of a relayer wallet"),
            &["chain", "address", "denom"],
        )?;

        registry.register(Box::new(attestation_total.clone()))?;
        registry.register(Box::new(attestation_pending.clone()))?;
        registry.register(Box::new(fast_transfer_allowance.clone()))?;
        registry.register(Box::new(broadcast_errors.clone()))?;
        registry.register(Box::new(latest_height.clone()))?;
        registry.register(Box::new(wallet_balance.clone()))?;

        Ok(Self {
            registry,
            attestation_total,
            attestation_pending,
            fast_transfer_allowance,
            broadcast_errors,
            latest_height,
            wallet_balance,
        })
    }

    pub fn inc_attestation(&self, status: &str, src: Domain, dest: Domain) {
        self.attestation_total
            .with_label_values(&[status, &src.to_string(), &dest.to_string()])
            .inc();
    }

    pub fn inc_pending(&self, src: Domain, dest: Domain) {
        self.attestation_pending
            .with_label_values(&[&src.to_string(), &dest.to_string()])
            .inc();
    }

    pub fn dec_pending(&self, src: Domain, dest: Domain) {
        self.attestation_pending
            .with_label_values(&[&src.to_string(), &dest.to_string()])
            .dec();
    }

    pub fn set_fast_transfer_allowance(&self, domain: Domain, token: &str, allowance: f64) {
        self.fast_transfer_allowance
            .with_label_values(&[&domain.to_string(), token])
            .set(allowance);
    }

    pub fn inc_broadcast_errors(&self, chain: &str, domain: Domain) {
        self.broadcast_errors
            .with_label_values(&[chain, &domain.to_string()])
            .inc();
    }

    pub fn set_latest_height(&self, chain: &str, domain: Domain, height: u64) {
        self.latest_height
            .with_label_values(&[chain, &domain.to_string()])
            .set(height as f64);
    }

    pub fn set_wallet_balance(&self, chain: &str, address: &str, denom: &str, balance: f64) {
        self.wallet_balance
            .with_label_values(&[chain, address, denom])
            .set(balance);
    }

    fn encode(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!("Failed to encode metrics: {e}");
        }
        buffer
    }
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: std::sync::Arc<RelayerMetrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => Ok(respond(StatusCode::OK, metrics.encode())),
        "/health" => Ok(respond(StatusCode::OK, "OK")),
        _ => Ok(respond(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Serves `/metrics` and `/health` until the task is aborted.
pub fn spawn_metrics_server(
    addr: SocketAddr,
    metrics: std::sync::Arc<RelayerMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server on {addr}: {e}");
                return;
            }
        };
        info!("Metrics server listening on http://{addr}/metrics");

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept metrics connection: {e}");
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            let metrics = std::sync::Arc::clone(&metrics);

            tokio::spawn(async move {
                let service =
                    service_fn(move |req| handle_request(req, std::sync::Arc::clone(&metrics)));
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {e}");
                }
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attestation_counter_tracks_per_label_counts() {
        let metrics = RelayerMetrics::new().unwrap();

        metrics.inc_attestation(status::OBSERVED, Domain(0), Domain(4));
        metrics.inc_attestation(status::OBSERVED, Domain(0), Domain(4));
        metrics.inc_attestation(status::MINTED, Domain(0), Domain(4));

        assert_eq!(
            metrics
                .attestation_total
                .with_label_values(&["observed", "0", "4"])
                .get(),
            2.0
        );
        assert_eq!(
            metrics
                .attestation_total
                .with_label_values(&["minted", "0", "4"])
                .get(),
            1.0
        );
    }

    #[test]
    fn pending_gauge_moves_both_directions() {
        let metrics = RelayerMetrics::new().unwrap();

        metrics.inc_pending(Domain(0), Domain(4));
        metrics.inc_pending(Domain(0), Domain(4));
        metrics.dec_pending(Domain(0), Domain(4));

        assert_eq!(
            metrics
                .attestation_pending
                .with_label_values(&["0", "4"])
                .get(),
            1.0
        );
    }

    #[test]
    fn text_encoding_includes_registered_families() {
        let metrics = RelayerMetrics::new().unwrap();
        metrics.set_latest_height("ethereum", Domain(0), 1234);
        metrics.set_fast_transfer_allowance(Domain(0), "USDC", 5.5);

        let body = String::from_utf8(metrics.encode()).unwrap();
        assert!(body.contains("latest_height"));
        assert!(body.contains("fast_transfer_allowance"));
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_encoding() {
        let metrics = std::sync::Arc::new(RelayerMetrics::new().unwrap());
        metrics.inc_attestation(status::OBSERVED, Domain(0), Domain(4));

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = spawn_metrics_server(addr, std::sync::Arc::clone(&metrics));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let body = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("attestation_total"));

        let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(health.status(), 200);

        server.abort();
    }
}
