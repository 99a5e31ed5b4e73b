//! Relayer configuration loading and validation.
//!
//! Reads a TOML config file, validates the attestation API version and the
//! cross-field constraints between v1/v2 settings, and exposes the typed
//! settings the rest of the crate consumes. Config parse errors at startup
//! are fatal: [`Config::load`] returns an error and the embedding binary
//! exits non-zero.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use tracing::Level;

use crate::types::Domain;

#[derive(Parser, Debug)]
pub struct Env {
    /// Path to the TOML configuration file
    #[clap(long)]
    pub config: PathBuf,
}

/// Attestation service API version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    /// v1: `GET /attestations/{messageHash}`
    V1,
    /// v2: `GET /v2/messages/{sourceDomain}?transactionHash={tx}`
    V2,
}

impl ApiVersion {
    /// Parses the config string, case-insensitive. Empty defaults to v1;
    /// unrecognized values are a fatal config error.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "v1" | "1" => Ok(Self::V1),
            "v2" | "2" => Ok(Self::V2),
            _ => Err(ConfigError::InvalidApiVersion {
                value: value.to_owned(),
            }),
        }
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Per-chain settings consumed by the core. Chain backends (listeners,
/// broadcasters) are constructed outside this crate.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ChainSettings {
    pub domain: Domain,
    /// Transfers below this amount are dropped by the low-transfer filter.
    /// Zero disables the minimum.
    #[serde(default)]
    pub min_mint_amount: u64,
}

/// One entry in the ordered plugin filter list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FilterSettings {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub config: Option<toml::Value>,
}

/// Attestation service settings, including the v2 Fast Transfer knobs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CircleSettings {
    pub attestation_base_url: String,
    #[serde(default)]
    pub api_version: String,
    /// Requeue budget for transient attestation/broadcast failures.
    #[serde(default)]
    pub fetch_retries: u32,
    /// Seconds to wait before pushing a transaction back onto the queue.
    #[serde(default)]
    pub fetch_retry_interval: u64,

    #[serde(default)]
    pub enable_fast_transfer_monitoring: bool,
    #[serde(default)]
    pub reattest_max_retries: i64,
    #[serde(default)]
    pub expiration_buffer_blocks: i64,
    #[serde(default)]
    pub allowance_monitor_token: String,
    #[serde(default)]
    pub allowance_monitor_interval: u64,
}

impl CircleSettings {
    pub fn api_version(&self) -> Result<ApiVersion, ConfigError> {
        ApiVersion::parse(&self.api_version)
    }

    /// Re-attestation attempt budget; zero or negative falls back to 3.
    pub fn effective_reattest_max_retries(&self) -> u32 {
        u32::try_from(self.reattest_max_retries).ok().filter(|&n| n > 0).unwrap_or(3)
    }

    /// Buffer blocks before expiry at which re-attestation triggers,
    /// clamped at zero.
    pub fn expiration_buffer(&self) -> u64 {
        u64::try_from(self.expiration_buffer_blocks).unwrap_or(0)
    }

    pub fn allowance_token(&self) -> &str {
        if self.allowance_monitor_token.is_empty() {
            "USDC"
        } else {
            &self.allowance_monitor_token
        }
    }

    /// Allowance polling interval in seconds; zero falls back to 30.
    pub fn allowance_interval(&self) -> u64 {
        if self.allowance_monitor_interval == 0 {
            30
        } else {
            self.allowance_monitor_interval
        }
    }

    /// Rejects v2-only settings under v1 and negative v2 budgets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let version = self.api_version()?;

        match version {
            ApiVersion::V2 => {
                if self.reattest_max_retries < 0 {
                    return Err(ConfigError::NegativeReattestRetries);
                }
                if self.expiration_buffer_blocks < 0 {
                    return Err(ConfigError::NegativeExpirationBuffer);
                }
            }
            ApiVersion::V1 => {
                if self.enable_fast_transfer_monitoring {
                    return Err(ConfigError::MonitoringRequiresV2);
                }
                if self.reattest_max_retries > 0 {
                    return Err(ConfigError::ReattestRequiresV2);
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    /// Address for the Prometheus `/metrics` endpoint; absent disables it.
    #[serde(default)]
    pub metrics_address: Option<SocketAddr>,
    #[serde(default)]
    pub chains: HashMap<String, ChainSettings>,
    #[serde(default)]
    pub enabled_routes: HashMap<Domain, Vec<Domain>>,
    #[serde(default = "default_worker_count")]
    pub processor_worker_count: u32,
    /// When set, the destination-caller filter drops even permissionless
    /// messages, forcing this relayer to be the designated caller.
    #[serde(default)]
    pub destination_caller_only: bool,
    #[serde(default)]
    pub filters: Vec<FilterSettings>,
    pub circle: CircleSettings,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.circle.validate()?;
        Ok(config)
    }
}

const fn default_true() -> bool {
    true
}

const fn default_worker_count() -> u32 {
    4
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML")]
    Toml(#[from] toml::de::Error),
    #[error("invalid api-version {value:?}: must be 'v1' or 'v2'")]
    InvalidApiVersion { value: String },
    #[error("enable-fast-transfer-monitoring requires api-version: v2")]
    MonitoringRequiresV2,
    #[error("reattest-max-retries requires api-version: v2")]
    ReattestRequiresV2,
    #[error("reattest-max-retries cannot be negative")]
    NegativeReattestRetries,
    #[error("expiration-buffer-blocks cannot be negative")]
    NegativeExpirationBuffer,
}
