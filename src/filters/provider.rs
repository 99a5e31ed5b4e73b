//! External list providers for filter data.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const QUICKNODE_BASE_URL: &str = "https://api.quicknode.com/kv/rest/v1/lists";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("key cannot be empty")]
    EmptyKey,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}")]
    Status { status: u16 },
}

/// A data source filters can refresh lists from.
#[async_trait]
pub trait ListProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_list(&self, key: &str) -> Result<Vec<String>, ProviderError>;
}

/// QuickNode KV store provider config (`provider_config` block).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuickNodeKvSettings {
    pub api_key: String,
    /// Override of the KV REST endpoint; defaults to QuickNode's public URL.
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KvResponse {
    data: KvData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KvData {
    items: Vec<String>,
}

/// REST client for QuickNode's KV list store.
pub struct QuickNodeKvProvider {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl QuickNodeKvProvider {
    pub fn new(settings: &QuickNodeKvSettings) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            api_key: settings.api_key.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| QUICKNODE_BASE_URL.to_owned()),
            http,
        })
    }
}

#[async_trait]
impl ListProvider for QuickNodeKvProvider {
    fn name(&self) -> &'static str {
        "quicknode-kv"
    }

    async fn fetch_list(&self, key: &str) -> Result<Vec<String>, ProviderError> {
        if key.is_empty() {
            return Err(ProviderError::EmptyKey);
        }

        let url = format!("{}/{key}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("accept", "application/json")
            .header("x-api-key", &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                status: response.status().as_u16(),
            });
        }

        let kv: KvResponse = response.json().await?;
        Ok(kv.data.items)
    }
}
