//! Tracing subscriber initialization.

use repokit_core::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::TelemetryError;
use crate::metrics::DEFAULT_NAMESPACE;

pub const DEFAULT_FILTER: &str = "repokit=debug,info";

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Prefix of every metric name
    pub metrics_namespace: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_json: env::flag("REPOKIT_LOG_JSON", false),
            default_filter: DEFAULT_FILTER.to_string(),
            metrics_namespace: env::string("REPOKIT_METRICS_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. Filtering follows `RUST_LOG` when set, else
/// `config.default_filter`. A second call fails because a global
/// subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let json_layer = config
        .log_json
        .then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!config.log_json).then(|| tracing_subscriber::fmt::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    tracing::info!(
        log_json = config.log_json,
        metrics_namespace = %config.metrics_namespace,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_filter, "repokit=debug,info");
        assert!(!config.metrics_namespace.is_empty());
    }

    #[test]
    fn test_init_twice_fails() {
        let config = TelemetryConfig {
            log_json: true,
            default_filter: "warn".to_string(),
            metrics_namespace: DEFAULT_NAMESPACE.to_string(),
        };
        let first = init_tracing(&config);
        let second = init_tracing(&config);
        // Another test binary may have installed a subscriber first.
        assert!(first.is_ok() || second.is_err());
        assert!(matches!(second, Err(TelemetryError::SubscriberInit(_))));
    }
}
