//! Metrics collection and Prometheus export.

mod collector;
mod server;
mod types;

pub use collector::MetricsCollector;
pub use server::{MetricsServer, MetricsServerConfig};
pub use types::{escape_label_value, Counter, Gauge, Histogram, DEFAULT_DURATION_BUCKETS};
