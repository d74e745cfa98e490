//! High-level recording interface over the raw Prometheus metrics.

use super::prometheus::{
    ACTIVE_WORKERS, JOBS_IN_PROGRESS, LEASES_RECLAIMED, PROCESSING_DURATION, QUEUE_DEPTH,
    SUBMISSIONS_DISCARDED, SUBMISSIONS_ENQUEUED, SUBMISSIONS_PROCESSED,
};

/// Metrics collector for queue and worker events.
///
/// Every method is a no-op until `init_metrics()` has run, so library
/// users that never export metrics pay only for the `OnceLock` lookup.
///
/// # Example
///
/// ```ignore
/// use judge_queue::metrics::{MetricsCollector, init_metrics};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
///
/// collector.record_enqueued("problems", "python");
/// collector.record_processed("completed", "python", 1.02);
/// collector.record_discarded("malformed");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a submission appended to `queue`.
    pub fn record_enqueued(&self, queue: &str, language: &str) {
        if let Some(enqueued) = SUBMISSIONS_ENQUEUED.get() {
            enqueued.with_label_values(&[queue, language]).inc();
        }

        tracing::trace!(queue = queue, language = language, "Recorded enqueue metric");
    }

    /// Record a submission handed to the processor.
    ///
    /// # Arguments
    ///
    /// * `outcome` - `"completed"`, `"skipped"` or `"failed"`
    /// * `language` - Submission language
    /// * `duration_secs` - Time spent in the processor
    pub fn record_processed(&self, outcome: &str, language: &str, duration_secs: f64) {
        if let Some(processed) = SUBMISSIONS_PROCESSED.get() {
            processed.with_label_values(&[outcome, language]).inc();
        }

        if let Some(duration) = PROCESSING_DURATION.get() {
            duration.with_label_values(&[language]).observe(duration_secs);
        }

        tracing::trace!(
            outcome = outcome,
            language = language,
            duration_secs = duration_secs,
            "Recorded processing metric"
        );
    }

    /// Record an entry a worker dropped, e.g. `"malformed"`.
    pub fn record_discarded(&self, reason: &str) {
        if let Some(discarded) = SUBMISSIONS_DISCARDED.get() {
            discarded.with_label_values(&[reason]).inc();
        }
    }

    /// Record entries returned to the queue by the lease reaper.
    pub fn record_reclaimed(&self, count: usize) {
        if let Some(reclaimed) = LEASES_RECLAIMED.get() {
            reclaimed.inc_by(count as f64);
        }
    }

    /// Update the pending depth of `queue_name`.
    pub fn update_queue_depth(&self, queue_name: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[queue_name])
                .set(depth as f64);
        }

        tracing::trace!(
            queue_name = queue_name,
            depth = depth,
            "Updated queue depth metric"
        );
    }

    /// Update the count of running workers.
    pub fn update_workers(&self, count: usize) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.set(count as f64);
        }

        tracing::trace!(count = count, "Updated active workers metric");
    }

    pub fn inc_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.inc();
        }
    }

    pub fn dec_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.dec();
        }
    }
}
