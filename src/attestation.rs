//! HTTP client for the attestation service.
//!
//! One stateless client shared by all workers. Every request carries a
//! bounded timeout so a slow attestation service cannot stall a worker
//! indefinitely. Lookup follows the configured API version: v1 keys by the
//! iris lookup id (hash of the MessageSent bytes), v2 keys by source domain
//! and transaction hash.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::{ApiVersion, CircleSettings, ConfigError};
use crate::types::Domain;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Attestation status reported by the service while confirmations are
/// still accumulating.
pub const STATUS_PENDING_CONFIRMATIONS: &str = "pending_confirmations";
/// Attestation status once the signature is final.
pub const STATUS_COMPLETE: &str = "complete";

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("invalid attestation client configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("attestation service returned HTTP {status}")]
    Status { status: u16 },
    #[error("no messages found for tx {tx_hash}")]
    NoMessages { tx_hash: String },
}

/// v1-shaped attestation lookup result; v2 lookups are folded into this
/// shape for the processor's status switch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AttestationResponse {
    pub attestation: String,
    pub status: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AttestationResponseV2 {
    messages: Vec<MessageResponseV2>,
}

/// Full v2 message detail, all fields decimal/hex strings as served.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageResponseV2 {
    pub message: String,
    pub attestation: String,
    pub status: String,
    pub event_nonce: String,
    pub source_domain: String,
    pub destination_domain: String,
    pub cctp_version: String,
    pub finality_threshold_executed: String,
    /// Destination block at which the attestation expires; decimal string.
    pub expiration_block: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ReattestResponse {
    #[serde(default)]
    attestation: String,
    #[serde(default)]
    status: String,
}

/// Remaining Fast Transfer capacity for a source domain.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FastTransferAllowance {
    pub source_domain: String,
    pub token: String,
    pub allowance: String,
    pub max_allowance: String,
}

/// Strips a trailing slash and any `/attestations` suffix so v1-style base
/// URLs keep working against v2 endpoints.
pub(crate) fn normalize_base_url(url: &str) -> &str {
    let url = url.strip_suffix('/').unwrap_or(url);
    url.strip_suffix("/attestations").unwrap_or(url)
}

/// Prefixes `0x` when absent.
fn normalize_message_hash(hash: &str) -> String {
    if hash.len() > 2 && !hash.starts_with("0x") {
        format!("0x{hash}")
    } else {
        hash.to_owned()
    }
}

/// Converts an expiration block string to a block number; empty input or
/// any parse failure yields 0 (no expiration known).
pub fn parse_expiration_block(expiration_block: &str) -> u64 {
    expiration_block.parse().unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct AttestationClient {
    http: reqwest::Client,
    base_url: String,
    api_version: ApiVersion,
}

impl AttestationClient {
    pub fn new(settings: &CircleSettings) -> Result<Self, AttestationError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            http,
            base_url: normalize_base_url(&settings.attestation_base_url).to_owned(),
            api_version: settings.api_version()?,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AttestationError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AttestationError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AttestationError> {
        let response = self.http.post(url).send().await?;
        if !response.status().is_success() {
            return Err(AttestationError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    /// Looks up the attestation for a message. Any transport error, non-200
    /// response, or empty v2 message list reads as *absent*.
    pub async fn check(
        &self,
        iris_lookup_id: &str,
        tx_hash: &str,
        source_domain: Domain,
    ) -> Option<AttestationResponse> {
        match self.api_version {
            ApiVersion::V1 => self.check_v1(iris_lookup_id).await,
            ApiVersion::V2 => self.check_v2(tx_hash, source_domain).await,
        }
    }

    async fn check_v1(&self, iris_lookup_id: &str) -> Option<AttestationResponse> {
        let lookup = normalize_message_hash(iris_lookup_id);
        let url = format!("{}/attestations/{lookup}", self.base_url);
        debug!(%url, "Checking v1 attestation");

        match self.get_json::<AttestationResponse>(&url).await {
            Ok(response) => {
                info!("Attestation found for {lookup}");
                Some(response)
            }
            Err(e) => {
                debug!(error = %e, "v1 attestation request failed");
                None
            }
        }
    }

    async fn check_v2(&self, tx_hash: &str, source_domain: Domain) -> Option<AttestationResponse> {
        match self.v2_messages(tx_hash, source_domain).await {
            Ok(messages) => {
                if messages.len() > 1 {
                    info!(
                        count = messages.len(),
                        tx_hash, "v2 attestation found multiple messages, using first"
                    );
                }
                messages.into_iter().next().map(|msg| AttestationResponse {
                    attestation: msg.attestation,
                    status: msg.status,
                })
            }
            Err(e) => {
                debug!(error = %e, "v2 attestation request failed");
                None
            }
        }
    }

    /// Fetches every v2 message observed in a source transaction. An empty
    /// message list is an error.
    pub async fn v2_messages(
        &self,
        tx_hash: &str,
        source_domain: Domain,
    ) -> Result<Vec<MessageResponseV2>, AttestationError> {
        let tx = normalize_message_hash(tx_hash);
        let url = format!(
            "{}/v2/messages/{source_domain}?transactionHash={tx}",
            self.base_url
        );
        debug!(%url, "Fetching v2 messages");

        let response: AttestationResponseV2 = self.get_json(&url).await?;
        if response.messages.is_empty() {
            return Err(AttestationError::NoMessages { tx_hash: tx });
        }
        Ok(response.messages)
    }

    /// First v2 message for a transaction, for backward compatibility with
    /// single-message lookups.
    pub async fn v2_message(
        &self,
        tx_hash: &str,
        source_domain: Domain,
    ) -> Result<MessageResponseV2, AttestationError> {
        let mut messages = self.v2_messages(tx_hash, source_domain).await?;
        Ok(messages.swap_remove(0))
    }

    /// Requests a fresh attestation for an expiring Fast Transfer nonce.
    pub async fn reattest(
        &self,
        source_domain: Domain,
        nonce: u64,
    ) -> Result<AttestationResponse, AttestationError> {
        let url = format!("{}/v2/reattest/{source_domain}/{nonce}", self.base_url);
        info!(%source_domain, nonce, "Requesting re-attestation");

        let response: ReattestResponse = self.post_json(&url).await?;

        info!(nonce, "Re-attestation successful");
        Ok(AttestationResponse {
            attestation: response.attestation,
            status: response.status,
        })
    }

    /// Queries remaining Fast Transfer capacity for a source domain.
    pub async fn fast_transfer_allowance(
        &self,
        source_domain: Domain,
        token: &str,
    ) -> Result<FastTransferAllowance, AttestationError> {
        let url = format!(
            "{}/v2/fastBurn/{token}/allowance?sourceDomain={source_domain}",
            self.base_url
        );
        debug!(%url, "Checking Fast Transfer allowance");

        let allowance: FastTransferAllowance = self.get_json(&url).await?;

        info!(
            %source_domain,
            allowance = %allowance.allowance,
            max_allowance = %allowance.max_allowance,
            token,
            "Fast Transfer allowance fetched"
        );
        Ok(allowance)
    }
}
