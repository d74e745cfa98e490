//! Metrics module for Prometheus-based monitoring.
//!
//! Covers both sides of the queue: submissions enqueued by producers,
//! submissions processed or discarded by workers, queue depth and worker
//! liveness.
//!
//! # Example
//!
//! ```ignore
//! use judge_queue::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! // Initialize metrics on startup
//! init_metrics()?;
//!
//! let collector = MetricsCollector::new();
//! collector.record_enqueued("problems", "python");
//! collector.record_processed("completed", "python", 1.2);
//!
//! // Export metrics in the text exposition format
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, JOBS_IN_PROGRESS, LEASES_RECLAIMED, PROCESSING_DURATION, QUEUE_DEPTH,
    REGISTRY, SUBMISSIONS_DISCARDED, SUBMISSIONS_ENQUEUED, SUBMISSIONS_PROCESSED,
};
