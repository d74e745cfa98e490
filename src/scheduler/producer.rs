//! Producer-side entry point of the pipeline.
//!
//! The ingress (HTTP handler, CLI, ...) hands a submission to a
//! [`SubmissionProducer`], which validates it, stamps the enqueue time and a
//! delivery id, and appends it to the queue tail. The producer never waits
//! for processing.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::ValidationError;
use crate::metrics::MetricsCollector;

use super::queue::{JobQueue, QueueError};
use super::submission::{QueueEntry, Submission};

/// Errors returned to the caller of [`SubmissionProducer::enqueue`].
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The submission was rejected before touching the queue.
    #[error("Invalid submission: {0}")]
    Invalid(#[from] ValidationError),

    /// The broker could not accept the submission. Safe to retry.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(#[source] QueueError),
}

impl From<QueueError> for SubmitError {
    fn from(err: QueueError) -> Self {
        SubmitError::QueueUnavailable(err)
    }
}

impl SubmitError {
    /// Whether the caller may retry the same submission later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::QueueUnavailable(_))
    }
}

/// Appends validated submissions to the shared queue.
pub struct SubmissionProducer {
    queue: JobQueue,
    metrics: MetricsCollector,
}

impl SubmissionProducer {
    /// Creates a producer that owns its own queue handle.
    pub fn new(queue: JobQueue) -> Self {
        Self {
            queue,
            metrics: MetricsCollector::new(),
        }
    }

    /// Submits a job from its three raw fields.
    pub async fn submit(
        &self,
        problem_id: impl Into<String>,
        code: impl Into<String>,
        language: impl Into<String>,
    ) -> Result<Submission, SubmitError> {
        self.enqueue(Submission::new(problem_id, code, language))
            .await
    }

    /// Validates and appends one submission to the tail of the queue.
    ///
    /// Returns the submission as it was written, including its enqueue
    /// timestamp.
    ///
    /// # Errors
    ///
    /// - `SubmitError::Invalid` if a field is missing; nothing is written
    /// - `SubmitError::QueueUnavailable` if the append failed; nothing is
    ///   written
    pub async fn enqueue(&self, submission: Submission) -> Result<Submission, SubmitError> {
        submission.validate()?;

        let stamped = submission.stamped(Utc::now());
        let entry = QueueEntry::encode(&stamped).map_err(QueueError::from)?;
        self.queue.enqueue(entry).await?;

        self.metrics
            .record_enqueued(self.queue.queue_name(), &stamped.language);
        info!(
            queue = %self.queue.queue_name(),
            problem_id = %stamped.problem_id,
            language = %stamped.language,
            "Submission enqueued"
        );

        Ok(stamped)
    }

    /// Validates every submission, then appends them all in one round trip.
    ///
    /// If any submission is invalid nothing is written.
    pub async fn enqueue_batch(
        &self,
        submissions: Vec<Submission>,
    ) -> Result<Vec<Submission>, SubmitError> {
        for submission in &submissions {
            submission.validate()?;
        }

        let now = Utc::now();
        let stamped: Vec<Submission> = submissions.iter().map(|s| s.stamped(now)).collect();
        let entries = stamped
            .iter()
            .map(QueueEntry::encode)
            .collect::<Result<Vec<_>, _>>()
            .map_err(QueueError::from)?;

        self.queue.enqueue_batch(entries).await?;

        for submission in &stamped {
            self.metrics
                .record_enqueued(self.queue.queue_name(), &submission.language);
        }
        debug!(
            queue = %self.queue.queue_name(),
            count = stamped.len(),
            "Submission batch enqueued"
        );

        Ok(stamped)
    }

    /// Returns the underlying queue handle.
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }
}
