//! Depositor-whitelist plugin filter.
//!
//! Only relays burns initiated by whitelisted depositors. Applies to EVM
//! source domains only; other domains pass through untouched. The whitelist
//! is refreshed on a background schedule from an external key-value list
//! source; a failed refresh keeps the previous cache.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::types::{BurnMessage, Domain, MessageState};

use super::provider::{ListProvider, QuickNodeKvProvider};
use super::{FilterError, MessageFilter, Verdict};

/// Seconds between whitelist refreshes when the config omits the interval.
pub const DEFAULT_REFRESH_INTERVAL: u64 = 300;

/// `config` block of the depositor-whitelist filter entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhitelistSettings {
    pub provider: String,
    pub provider_config: toml::Value,
    pub kv_key: String,
    pub refresh_interval: Option<u64>,
}

#[derive(Debug)]
pub struct DepositorWhitelistFilter {
    whitelist: Arc<RwLock<HashSet<String>>>,
    cancel: CancellationToken,
}

impl DepositorWhitelistFilter {
    /// Builds the filter, performs the initial whitelist fetch (failure is
    /// fatal), and spawns the background refresher.
    pub async fn initialize(
        settings: WhitelistSettings,
        cancel: CancellationToken,
    ) -> Result<Self, FilterError> {
        let provider: Box<dyn ListProvider> = match settings.provider.as_str() {
            "quicknode-kv" => {
                let provider_settings = settings.provider_config.clone().try_into()?;
                Box::new(QuickNodeKvProvider::new(&provider_settings)?)
            }
            other => {
                return Err(FilterError::UnknownProvider {
                    name: other.to_owned(),
                });
            }
        };

        let refresh_interval = match settings.refresh_interval {
            Some(secs) if secs > 0 => secs,
            _ => DEFAULT_REFRESH_INTERVAL,
        };

        Self::with_provider(provider, settings.kv_key, refresh_interval, cancel).await
    }

    pub(crate) async fn with_provider(
        provider: Box<dyn ListProvider>,
        kv_key: String,
        refresh_interval: u64,
        cancel: CancellationToken,
    ) -> Result<Self, FilterError> {
        let whitelist = Arc::new(RwLock::new(HashSet::new()));

        let initial = provider.fetch_list(&kv_key).await?;
        *whitelist.write() = normalize_list(&initial);

        info!(
            provider = provider.name(),
            %kv_key,
            refresh_interval,
            initial_count = whitelist.read().len(),
            "Depositor whitelist filter initialized"
        );

        tokio::spawn(run_refresher(
            provider,
            kv_key,
            Duration::from_secs(refresh_interval),
            Arc::clone(&whitelist),
            cancel.clone(),
        ));

        Ok(Self { whitelist, cancel })
    }

    fn is_whitelisted(&self, address: &str) -> bool {
        self.whitelist.read().contains(address)
    }

    #[cfg(test)]
    pub(crate) fn count(&self) -> usize {
        self.whitelist.read().len()
    }
}

impl MessageFilter for DepositorWhitelistFilter {
    fn name(&self) -> &'static str {
        "depositor-whitelist"
    }

    fn filter(&self, msg: &MessageState) -> Result<Verdict, FilterError> {
        if !is_evm_domain(msg.source_domain) {
            return Ok(Verdict::Pass);
        }

        // Fail closed: a message we cannot attribute to a depositor is
        // dropped rather than relayed.
        let depositor = match BurnMessage::parse(&msg.msg_body) {
            Ok(burn) => format!("{:#x}", burn.depositor()),
            Err(e) => {
                error!(tx = %msg.source_tx_hash, error = %e, "Failed to extract depositor address");
                return Ok(Verdict::drop("failed to extract depositor address"));
            }
        };

        if !self.is_whitelisted(&depositor) {
            return Ok(Verdict::drop(format!(
                "non-whitelisted depositor: {depositor} (source_domain={}, dest_domain={})",
                msg.source_domain, msg.dest_domain
            )));
        }

        Ok(Verdict::Pass)
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

async fn run_refresher(
    provider: Box<dyn ListProvider>,
    kv_key: String,
    interval: Duration,
    whitelist: Arc<RwLock<HashSet<String>>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // first tick fires immediately; the initial fetch already ran

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Depositor whitelist refresher stopping");
                return;
            }
            _ = ticker.tick() => match provider.fetch_list(&kv_key).await {
                Ok(addresses) => {
                    let refreshed = normalize_list(&addresses);
                    if refreshed.is_empty() {
                        info!("Whitelist is empty after refresh");
                    }
                    let count = refreshed.len();
                    *whitelist.write() = refreshed;
                    debug!(count, "Whitelist refreshed");
                }
                Err(e) => {
                    // Previous cache stays in place.
                    warn!(error = %e, "Failed to refresh whitelist");
                }
            },
        }
    }
}

fn normalize_list(addresses: &[String]) -> HashSet<String> {
    addresses
        .iter()
        .filter_map(|addr| normalize_address(addr))
        .collect()
}

/// Lowercases a hex address for case-insensitive matching; rejects anything
/// that is not a 20-byte hex address.
fn normalize_address(address: &str) -> Option<String> {
    let trimmed = address.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);

    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    Some(format!("0x{}", hex.to_ascii_lowercase()))
}

/// CCTP domains backed by EVM chains. Noble (4), Solana (5), Monad (15),
/// and Starknet Testnet (25) are not.
fn is_evm_domain(domain: Domain) -> bool {
    matches!(
        domain.0,
        0 | 1 | 2 | 3 | 6 | 7 | 10 | 11 | 12 | 13 | 14 | 16 | 17 | 18 | 19 | 21 | 22 | 26
    )
}
