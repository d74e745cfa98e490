//! Prometheus metrics registration and export.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all judge_queue metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Submissions appended to a queue, labeled by queue and language.
pub static SUBMISSIONS_ENQUEUED: OnceLock<CounterVec> = OnceLock::new();

/// Submissions handed to the processor, labeled by outcome and language.
pub static SUBMISSIONS_PROCESSED: OnceLock<CounterVec> = OnceLock::new();

/// Entries dropped by workers, labeled by reason.
pub static SUBMISSIONS_DISCARDED: OnceLock<CounterVec> = OnceLock::new();

/// Processing duration in seconds, labeled by language.
pub static PROCESSING_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of pending entries, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of submissions currently being processed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of running worker loops.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Entries returned to the queue after their lease expired.
pub static LEASES_RECLAIMED: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in
/// place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric definition is invalid.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let submissions_enqueued = CounterVec::new(
        Opts::new(
            "judge_queue_submissions_enqueued_total",
            "Total submissions appended to the queue",
        ),
        &["queue", "language"],
    )?;

    let submissions_processed = CounterVec::new(
        Opts::new(
            "judge_queue_submissions_processed_total",
            "Total submissions handed to the processor",
        ),
        &["outcome", "language"],
    )?;

    let submissions_discarded = CounterVec::new(
        Opts::new(
            "judge_queue_submissions_discarded_total",
            "Total queue entries dropped by workers",
        ),
        &["reason"],
    )?;

    let processing_duration = HistogramVec::new(
        HistogramOpts::new(
            "judge_queue_processing_duration_seconds",
            "Submission processing duration in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["language"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("judge_queue_queue_depth", "Number of pending entries in queue"),
        &["queue_name"],
    )?;

    let jobs_in_progress = Gauge::new(
        "judge_queue_jobs_in_progress",
        "Number of submissions currently being processed",
    )?;

    let active_workers = Gauge::new("judge_queue_active_workers", "Number of running workers")?;

    let leases_reclaimed = Counter::new(
        "judge_queue_leases_reclaimed_total",
        "Total entries returned to the queue after lease expiry",
    )?;

    registry.register(Box::new(submissions_enqueued.clone()))?;
    registry.register(Box::new(submissions_processed.clone()))?;
    registry.register(Box::new(submissions_discarded.clone()))?;
    registry.register(Box::new(processing_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(leases_reclaimed.clone()))?;

    // Already initialized if any of these fail
    let _ = REGISTRY.set(registry);
    let _ = SUBMISSIONS_ENQUEUED.set(submissions_enqueued);
    let _ = SUBMISSIONS_PROCESSED.set(submissions_processed);
    let _ = SUBMISSIONS_DISCARDED.set(submissions_discarded);
    let _ = PROCESSING_DURATION.set(processing_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = LEASES_RECLAIMED.set(leases_reclaimed);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_metrics_after_init() {
        init_metrics().expect("init metrics");

        if let Some(counter) = SUBMISSIONS_ENQUEUED.get() {
            counter.with_label_values(&["export_test", "rust"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("judge_queue_submissions_enqueued_total"));
    }
}
