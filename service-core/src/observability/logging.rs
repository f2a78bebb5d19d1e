use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LogFormat};
use crate::error::AppError;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.log_level` when set. Fails instead of
/// panicking if a subscriber is already installed.
pub fn init_tracing(config: &Config) -> Result<(), AppError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(true)
                    .with_line_number(true)
                    .json()
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };

    result.map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;

    tracing::info!(service = %config.service_name, "Tracing initialized");
    Ok(())
}
