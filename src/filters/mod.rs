//! Message filter pipeline.
//!
//! Filters run in registration order against every message on every
//! processing pass and short-circuit on the first drop. A filter that
//! returns an error is logged and treated as non-matching; whether to fail
//! open or closed on bad input is each filter's own choice (the
//! depositor-whitelist drops unparseable messages, for example).
//!
//! Built-ins (route, destination-caller, low-transfer) are always
//! registered; plugins are loaded from the ordered `filters` config list.

mod depositor_whitelist;
mod destination_caller;
mod low_transfer;
mod provider;
mod route;

pub use depositor_whitelist::{
    DEFAULT_REFRESH_INTERVAL, DepositorWhitelistFilter, WhitelistSettings,
};
pub use destination_caller::DestinationCallerFilter;
pub use low_transfer::LowTransferFilter;
pub use provider::{ListProvider, ProviderError, QuickNodeKvProvider, QuickNodeKvSettings};
pub use route::RouteFilter;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::chain::Chain;
use crate::config::Config;
use crate::types::{Domain, MessageState};

/// Per-message filter decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Drop { reason: String },
}

impl Verdict {
    pub fn drop(reason: impl Into<String>) -> Self {
        Self::Drop {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("unknown filter {name:?}")]
    UnknownFilter { name: String },
    #[error("filter {name} requires a config block")]
    MissingFilterConfig { name: String },
    #[error("invalid filter config: {0}")]
    InvalidFilterConfig(#[from] toml::de::Error),
    #[error("unknown provider {name:?}")]
    UnknownProvider { name: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Uniform filter capability: a name for logs, a per-message decision, and
/// a shutdown hook. Initialization is each filter's constructor, run once
/// at startup; the registry is read-only afterwards.
pub trait MessageFilter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn filter(&self, msg: &MessageState) -> Result<Verdict, FilterError>;

    fn close(&self) {}
}

/// Ordered, read-only set of filters.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: Vec<Box<dyn MessageFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, filter: Box<dyn MessageFilter>) {
        debug!(name = filter.name(), "Registered filter");
        self.filters.push(filter);
    }

    /// Runs the pipeline; returns the drop reason of the first matching
    /// filter, or `None` when every filter passes. Filter errors are logged
    /// and skipped.
    pub fn evaluate(&self, msg: &MessageState) -> Option<String> {
        for filter in &self.filters {
            match filter.filter(msg) {
                Ok(Verdict::Pass) => {}
                Ok(Verdict::Drop { reason }) => return Some(reason),
                Err(e) => {
                    error!(filter = filter.name(), error = %e, "Filter error");
                }
            }
        }
        None
    }

    pub fn close(&self) {
        for filter in &self.filters {
            filter.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.filters.len()
    }
}

/// Builds the pipeline from configuration: built-ins first, then enabled
/// plugin filters in their configured order. Unknown plugin names and
/// plugin initialization failures are fatal.
pub async fn build_filters(
    config: &Config,
    registered_domains: Arc<HashMap<Domain, Arc<dyn Chain>>>,
    cancel: &CancellationToken,
) -> Result<FilterRegistry, FilterError> {
    let mut registry = FilterRegistry::new();

    registry.register(Box::new(RouteFilter::new(config.enabled_routes.clone())));
    registry.register(Box::new(DestinationCallerFilter::new(
        registered_domains,
        config.destination_caller_only,
    )));
    registry.register(Box::new(LowTransferFilter::new(&config.chains)));

    for settings in &config.filters {
        if !settings.enabled {
            continue;
        }

        match settings.name.as_str() {
            "depositor-whitelist" => {
                let value = settings.config.clone().ok_or_else(|| {
                    FilterError::MissingFilterConfig {
                        name: settings.name.clone(),
                    }
                })?;
                let whitelist_settings: WhitelistSettings = value.try_into()?;
                let filter =
                    DepositorWhitelistFilter::initialize(whitelist_settings, cancel.child_token())
                        .await?;
                registry.register(Box::new(filter));
            }
            other => {
                return Err(FilterError::UnknownFilter {
                    name: other.to_owned(),
                });
            }
        }
    }

    Ok(registry)
}
