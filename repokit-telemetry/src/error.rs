//! Telemetry error types.

/// Failure to register, record or export a metric.
///
/// Never returned from repository operations; the metrics decorator logs
/// and drops it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to register {name}: {reason}")]
    Registration { name: String, reason: String },

    #[error("Failed to record observation: {reason}")]
    Observe { reason: String },

    #[error("Failed to encode metrics: {reason}")]
    Encode { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to init subscriber: {0}")]
    SubscriberInit(String),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}
