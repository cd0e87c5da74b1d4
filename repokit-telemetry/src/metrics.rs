//! Prometheus Metrics Definitions
//!
//! One histogram, `<namespace>_db_query_duration_seconds`, labelled by
//! entity, operation and outcome.

use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder};
use repokit_core::Operation;

use crate::error::MetricsError;
use crate::tracer::TelemetryConfig;

/// Query latency buckets (seconds)
/// Covers: 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
pub const QUERY_LATENCY_BUCKETS: &[f64] =
    &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0];

pub const DEFAULT_NAMESPACE: &str = "repokit";

const QUERY_DURATION_NAME: &str = "db_query_duration_seconds";
const LABELS: &[&str] = &["entity", "operation", "status"];

/// Global metrics instance on the default registry, created on first use.
static GLOBAL: Lazy<Result<RepoMetrics, MetricsError>> = Lazy::new(|| {
    let namespace = TelemetryConfig::default().metrics_namespace;
    RepoMetrics::with_namespace(prometheus::default_registry(), &namespace)
});

/// Outcome label of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    Success,
    Error,
}

impl QueryStatus {
    pub fn from_ok(ok: bool) -> Self {
        if ok {
            QueryStatus::Success
        } else {
            QueryStatus::Error
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for per-operation timings.
pub trait MetricsSink: Send + Sync + 'static {
    fn observe(
        &self,
        entity: &str,
        operation: Operation,
        status: QueryStatus,
        elapsed: Duration,
    ) -> Result<(), MetricsError>;
}

/// Prometheus-backed [`MetricsSink`].
#[derive(Clone)]
pub struct RepoMetrics {
    /// Query duration histogram - labels: entity, operation, status
    pub query_duration_seconds: HistogramVec,
}

impl fmt::Debug for RepoMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoMetrics").finish_non_exhaustive()
    }
}

impl RepoMetrics {
    /// Create and register the histogram on `registry` under the default
    /// namespace.
    pub fn new(registry: &Registry) -> Result<Self, MetricsError> {
        Self::with_namespace(registry, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(registry: &Registry, namespace: &str) -> Result<Self, MetricsError> {
        let registration = |e: prometheus::Error| MetricsError::Registration {
            name: format!("{}_{}", namespace, QUERY_DURATION_NAME),
            reason: e.to_string(),
        };

        let opts = HistogramOpts::new(QUERY_DURATION_NAME, "Repository query duration in seconds")
            .namespace(namespace)
            .buckets(QUERY_LATENCY_BUCKETS.to_vec());
        let query_duration_seconds = HistogramVec::new(opts, LABELS).map_err(registration)?;
        registry
            .register(Box::new(query_duration_seconds.clone()))
            .map_err(registration)?;

        Ok(Self {
            query_duration_seconds,
        })
    }

    /// Shared instance on the default Prometheus registry.
    pub fn global() -> Result<&'static RepoMetrics, MetricsError> {
        GLOBAL.as_ref().map_err(Clone::clone)
    }

    /// Record a repository operation.
    pub fn record_query(&self, entity: &str, operation: Operation, success: bool, duration_secs: f64) {
        self.query_duration_seconds
            .with_label_values(&[entity, operation.as_str(), QueryStatus::from_ok(success).as_str()])
            .observe(duration_secs);
    }
}

impl MetricsSink for RepoMetrics {
    fn observe(
        &self,
        entity: &str,
        operation: Operation,
        status: QueryStatus,
        elapsed: Duration,
    ) -> Result<(), MetricsError> {
        let histogram = self
            .query_duration_seconds
            .get_metric_with_label_values(&[entity, operation.as_str(), status.as_str()])
            .map_err(|e| MetricsError::Observe {
                reason: e.to_string(),
            })?;
        histogram.observe(elapsed.as_secs_f64());
        Ok(())
    }
}

/// Encode every metric on `registry` in the Prometheus text format.
pub fn gather_metrics(registry: &Registry) -> Result<String, MetricsError> {
    encode(&registry.gather())
}

/// Encode every metric on the default registry.
pub fn gather_default_metrics() -> Result<String, MetricsError> {
    encode(&prometheus::gather())
}

fn encode(families: &[prometheus::proto::MetricFamily]) -> Result<String, MetricsError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(families, &mut buffer)
        .map_err(|e| MetricsError::Encode {
            reason: e.to_string(),
        })?;
    String::from_utf8(buffer).map_err(|e| MetricsError::Encode {
        reason: e.to_string(),
    })
}
