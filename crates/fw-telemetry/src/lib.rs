//! Observability for the fleetwork runtime.
//!
//! - **Logging**: human-readable or JSON output via `tracing-subscriber`
//! - **Metrics**: the [`metrics::MetricsSink`] interface the agent loops
//!   report through, and an in-process [`metrics::MetricsCollector`] with
//!   Prometheus and JSON export

pub mod logging;
pub mod metrics;
