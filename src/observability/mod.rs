use crate::config::{LogFormat, LoggingConfig};
use crate::error::{ClientError, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "resilient_http=debug,tower_http=debug";

/// Initialize tracing/logging.
///
/// `RUST_LOG` wins over the configured filter.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .filter
            .as_deref()
            .unwrap_or(DEFAULT_FILTER)
            .into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| ClientError::Internal(format!("Failed to install subscriber: {}", e)))?;

    info!(format = ?config.format, "Tracing initialized");
    Ok(())
}
