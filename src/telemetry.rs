//! Console tracing setup.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Installs the global console subscriber. `RUST_LOG` overrides the
/// configured level when set.
pub fn setup_tracing(level: LogLevel) {
    let level: Level = level.into();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cctp_relayer={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
