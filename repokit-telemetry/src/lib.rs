//! Repokit Telemetry
//!
//! Prometheus timing for repositories via [`MetricsRepository`], and the
//! tracing subscriber setup shared by binaries embedding repokit.

pub mod decorator;
pub mod error;
pub mod metrics;
pub mod tracer;

pub use decorator::MetricsRepository;
pub use error::{MetricsError, TelemetryError};
pub use metrics::{
    gather_default_metrics, gather_metrics, MetricsSink, QueryStatus, RepoMetrics, DEFAULT_NAMESPACE,
    QUERY_LATENCY_BUCKETS,
};
pub use tracer::{init_tracing, TelemetryConfig, DEFAULT_FILTER};
