//! Processing step invoked by workers.
//!
//! A [`SubmissionProcessor`] receives one owned submission at a time. With
//! at-most-once delivery it runs exactly once per dequeued entry (zero times
//! if the worker dies first). With leased delivery an entry whose lease
//! expired mid-processing is delivered again, so processors with side
//! effects should be wrapped in an [`IdempotentProcessor`].

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ProcessingError;

use super::submission::{ProcessingResult, Submission};

/// Default number of fingerprints remembered by [`IdempotentProcessor`].
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Executes one submission.
#[async_trait]
pub trait SubmissionProcessor: Send + Sync {
    /// Processes `submission` on behalf of `worker_id`.
    async fn process(
        &self,
        submission: &Submission,
        worker_id: &str,
    ) -> Result<ProcessingResult, ProcessingError>;
}

#[async_trait]
impl<P: SubmissionProcessor + ?Sized> SubmissionProcessor for Arc<P> {
    async fn process(
        &self,
        submission: &Submission,
        worker_id: &str,
    ) -> Result<ProcessingResult, ProcessingError> {
        (**self).process(submission, worker_id).await
    }
}

/// Reference processor: logs the submission and simulates the work.
///
/// Stands in for the sandboxed judge, which lives outside this crate.
#[derive(Debug, Clone)]
pub struct LoggingProcessor {
    simulated_duration: Duration,
    languages: Option<HashSet<String>>,
}

impl LoggingProcessor {
    /// Creates a processor that takes `simulated_duration` per submission.
    pub fn new(simulated_duration: Duration) -> Self {
        Self {
            simulated_duration,
            languages: None,
        }
    }

    /// Restricts the processor to the given languages; others fail with
    /// `ProcessingError::UnsupportedLanguage`.
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = Some(
            languages
                .into_iter()
                .map(|l| l.into().to_lowercase())
                .collect(),
        );
        self
    }
}

impl Default for LoggingProcessor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl SubmissionProcessor for LoggingProcessor {
    async fn process(
        &self,
        submission: &Submission,
        worker_id: &str,
    ) -> Result<ProcessingResult, ProcessingError> {
        if let Some(languages) = &self.languages {
            if !languages.contains(&submission.language.to_lowercase()) {
                return Err(ProcessingError::UnsupportedLanguage(
                    submission.language.clone(),
                ));
            }
        }

        let start = Instant::now();
        info!(
            worker_id = %worker_id,
            problem_id = %submission.problem_id,
            language = %submission.language,
            code_bytes = submission.code.len(),
            "Processing submission"
        );
        debug!(problem_id = %submission.problem_id, code = %submission.code, "Submission code");

        tokio::time::sleep(self.simulated_duration).await;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            worker_id = %worker_id,
            problem_id = %submission.problem_id,
            duration_ms = duration_ms,
            "Finished processing submission"
        );

        Ok(ProcessingResult::completed(submission, worker_id, duration_ms))
    }
}

/// Remembers completed fingerprints, evicting the oldest past `capacity`.
#[derive(Debug)]
struct SeenSet {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    fn contains(&self, fingerprint: &str) -> bool {
        self.members.contains(fingerprint)
    }

    fn insert(&mut self, fingerprint: String) {
        if !self.members.insert(fingerprint.clone()) {
            return;
        }
        self.order.push_back(fingerprint);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }
}

/// Skips deliveries whose fingerprint already completed in this process.
///
/// Submissions without a delivery id are always processed. Only successful
/// runs are remembered, so a delivery that failed is
/// processed again if it is redelivered. Deliveries racing on the same
/// fingerprint are not serialized: both may run if neither has finished.
pub struct IdempotentProcessor<P> {
    inner: P,
    seen: Mutex<SeenSet>,
}

impl<P: SubmissionProcessor> IdempotentProcessor<P> {
    pub fn new(inner: P) -> Self {
        Self::with_capacity(inner, DEFAULT_DEDUP_CAPACITY)
    }

    pub fn with_capacity(inner: P, capacity: usize) -> Self {
        Self {
            inner,
            seen: Mutex::new(SeenSet::new(capacity)),
        }
    }

    /// Returns whether `submission` has already been processed.
    pub async fn has_processed(&self, submission: &Submission) -> bool {
        match submission.fingerprint() {
            Some(fingerprint) => self.seen.lock().await.contains(&fingerprint),
            None => false,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: SubmissionProcessor> SubmissionProcessor for IdempotentProcessor<P> {
    async fn process(
        &self,
        submission: &Submission,
        worker_id: &str,
    ) -> Result<ProcessingResult, ProcessingError> {
        let Some(fingerprint) = submission.fingerprint() else {
            return self.inner.process(submission, worker_id).await;
        };

        if self.seen.lock().await.contains(&fingerprint) {
            info!(
                worker_id = %worker_id,
                problem_id = %submission.problem_id,
                fingerprint = %fingerprint,
                "Skipping already processed submission"
            );
            return Ok(ProcessingResult::skipped(submission, worker_id));
        }

        let result = self.inner.process(submission, worker_id).await?;
        self.seen.lock().await.insert(fingerprint);
        Ok(result)
    }
}
