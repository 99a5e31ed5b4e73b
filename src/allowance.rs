//! Fast Transfer allowance monitoring.
//!
//! Advisory observer, not a gate: it records how much Fast Transfer
//! capacity each source domain has left so operators can see throttling
//! coming. Only runs under the v2 API with monitoring explicitly enabled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::attestation::{AttestationClient, FastTransferAllowance};
use crate::config::{ApiVersion, CircleSettings};
use crate::metrics::RelayerMetrics;
use crate::types::Domain;

pub struct AllowanceMonitor {
    client: Arc<AttestationClient>,
    metrics: Arc<RelayerMetrics>,
    state: RwLock<HashMap<Domain, FastTransferAllowance>>,
    domains: Vec<Domain>,
    token: String,
    interval: Duration,
}

impl AllowanceMonitor {
    pub fn new(
        settings: &CircleSettings,
        client: Arc<AttestationClient>,
        domains: Vec<Domain>,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        Self {
            client,
            metrics,
            state: RwLock::new(HashMap::new()),
            domains,
            token: settings.allowance_token().to_owned(),
            interval: Duration::from_secs(settings.allowance_interval()),
        }
    }

    /// Latest recorded allowance for a domain.
    pub fn get(&self, domain: Domain) -> Option<FastTransferAllowance> {
        self.state.read().get(&domain).cloned()
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            domains = ?self.domains,
            interval_secs = self.interval.as_secs(),
            "Starting Fast Transfer allowance monitoring"
        );
        self.query_allowances().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate tick already consumed by the query above

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Stopping Fast Transfer allowance monitoring");
                    return;
                }
                _ = ticker.tick() => self.query_allowances().await,
            }
        }
    }

    async fn query_allowances(&self) {
        for &domain in &self.domains {
            let allowance = match self
                .client
                .fast_transfer_allowance(domain, &self.token)
                .await
            {
                Ok(allowance) => allowance,
                Err(e) => {
                    // Previous value is retained.
                    error!(%domain, error = %e, "Failed to fetch allowance");
                    continue;
                }
            };

            if let Ok(value) = allowance.allowance.parse::<u64>() {
                self.metrics
                    .set_fast_transfer_allowance(domain, &self.token, value as f64 / 1e6);
            }

            self.state.write().insert(domain, allowance);
        }
    }
}

/// Spawns the monitor when the API version is v2 and monitoring is enabled;
/// otherwise returns `None`.
pub fn start_allowance_monitor(
    settings: &CircleSettings,
    client: Arc<AttestationClient>,
    domains: Vec<Domain>,
    metrics: Arc<RelayerMetrics>,
    cancel: CancellationToken,
) -> Option<(Arc<AllowanceMonitor>, JoinHandle<()>)> {
    let is_v2 = matches!(settings.api_version(), Ok(ApiVersion::V2));
    if !is_v2 {
        info!("Fast Transfer allowance monitoring disabled (not v2)");
        return None;
    }
    if !settings.enable_fast_transfer_monitoring {
        info!("Fast Transfer allowance monitoring disabled by config");
        return None;
    }

    let monitor = Arc::new(AllowanceMonitor::new(settings, client, domains, metrics));
    let handle = tokio::spawn(Arc::clone(&monitor).run(cancel));
    Some((monitor, handle))
}
