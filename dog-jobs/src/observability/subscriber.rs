use tracing_subscriber::EnvFilter;

use crate::{QueueError, QueueResult};

/// Output format for the global subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a global `tracing` subscriber filtered by `RUST_LOG`
///
/// Falls back to `info` when `RUST_LOG` is unset or invalid. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> QueueResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| QueueError::configuration(format!("failed to install tracing subscriber: {e}")))
}
