//! Submission definitions for the queue pipeline.
//!
//! This module defines the unit of work handed from producers to workers:
//!
//! - `Submission`: A problem id, source code and language tag
//! - `QueueEntry`: The serialized wire form stored in the broker
//! - `ProcessingResult`: Outcome reported by a processor
//! - `ProcessingStatus`: Status of a processed submission

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ValidationError;

use super::backend::LeaseId;

/// A code submission waiting to be judged.
///
/// The wire form uses camelCase keys so entries written by other producers
/// (`{"problemId": ..., "code": ..., "language": ...}`) decode unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Identifier of the problem being solved.
    pub problem_id: String,
    /// Source code written by the user.
    pub code: String,
    /// Language of `code` (e.g. "python", "rust").
    pub language: String,
    /// When the producer appended this submission. Diagnostics only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,
    /// Unique id assigned by the producer when the entry is written.
    ///
    /// Redeliveries of one entry carry the same id. Entries from writers that
    /// do not set it have no delivery identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<Uuid>,
}

impl Submission {
    /// Creates a new submission that has not been enqueued yet.
    pub fn new(
        problem_id: impl Into<String>,
        code: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            problem_id: problem_id.into(),
            code: code.into(),
            language: language.into(),
            enqueued_at: None,
            delivery_id: None,
        }
    }

    /// Checks that every field a worker relies on is present.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingField` naming the first empty field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.problem_id.trim().is_empty() {
            return Err(ValidationError::MissingField("problemId"));
        }
        if self.code.is_empty() {
            return Err(ValidationError::MissingField("code"));
        }
        if self.language.trim().is_empty() {
            return Err(ValidationError::MissingField("language"));
        }
        Ok(())
    }

    /// Returns a copy stamped with the given enqueue time and a fresh
    /// delivery id.
    pub fn stamped(&self, at: DateTime<Utc>) -> Self {
        Self {
            enqueued_at: Some(at),
            delivery_id: Some(Uuid::new_v4()),
            ..self.clone()
        }
    }

    /// Stable hex fingerprint of this queue entry, if it has a delivery id.
    ///
    /// Redeliveries of the same entry share a fingerprint. Separate
    /// submissions never do, even with identical fields. Entries without a
    /// delivery id have no fingerprint and must not be deduplicated.
    pub fn fingerprint(&self) -> Option<String> {
        let id = self.delivery_id?;
        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        for part in [
            self.problem_id.as_bytes(),
            self.language.as_bytes(),
            self.code.as_bytes(),
        ] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        Some(hex::encode(hasher.finalize()))
    }

    /// Returns how long ago the submission was enqueued, if known.
    pub fn age(&self) -> Option<chrono::Duration> {
        self.enqueued_at.map(|at| Utc::now() - at)
    }
}

/// Serialized form of a submission as stored in the broker.
///
/// Entries popped under leased delivery carry the lease that must be
/// acknowledged once the worker is done with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    payload: String,
    lease: Option<LeaseId>,
}

impl QueueEntry {
    /// Serializes a submission into its wire form.
    pub fn encode(submission: &Submission) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payload: serde_json::to_string(submission)?,
            lease: None,
        })
    }

    /// Wraps a raw payload as read from the broker.
    pub fn from_payload(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            lease: None,
        }
    }

    pub(crate) fn with_lease(mut self, lease: LeaseId) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Parses the payload back into a submission.
    pub fn decode(&self) -> Result<Submission, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// The raw JSON payload.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The lease held on this entry, if it was dequeued under leased delivery.
    pub fn lease(&self) -> Option<&LeaseId> {
        self.lease.as_ref()
    }
}

/// Status of a processed submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// The processor ran to completion.
    Completed,
    /// The delivery had already been processed and was skipped.
    Skipped,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStatus::Completed => write!(f, "completed"),
            ProcessingStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of processing one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Fingerprint of the processed delivery, if it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Problem the submission belongs to.
    pub problem_id: String,
    /// Final status.
    pub status: ProcessingStatus,
    /// Worker that handled the submission.
    pub worker_id: String,
    /// Time spent in the processor, in milliseconds.
    pub duration_ms: u64,
    /// When processing finished.
    pub completed_at: DateTime<Utc>,
}

impl ProcessingResult {
    /// Creates a completed result.
    pub fn completed(
        submission: &Submission,
        worker_id: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            fingerprint: submission.fingerprint(),
            problem_id: submission.problem_id.clone(),
            status: ProcessingStatus::Completed,
            worker_id: worker_id.into(),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    /// Creates a result for a delivery that was already processed.
    pub fn skipped(submission: &Submission, worker_id: impl Into<String>) -> Self {
        Self {
            fingerprint: submission.fingerprint(),
            problem_id: submission.problem_id.clone(),
            status: ProcessingStatus::Skipped,
            worker_id: worker_id.into(),
            duration_ms: 0,
            completed_at: Utc::now(),
        }
    }

    /// Returns whether the processor actually ran.
    pub fn is_completed(&self) -> bool {
        self.status == ProcessingStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_submission_new() {
        let submission = Submission::new("p1", "print(1)", "python");

        assert_eq!(submission.problem_id, "p1");
        assert_eq!(submission.code, "print(1)");
        assert_eq!(submission.language, "python");
        assert!(submission.enqueued_at.is_none());
        assert!(submission.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let err = Submission::new("", "print(1)", "python")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingField("problemId")));

        let err = Submission::new("p1", "", "python").validate().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField("code")));

        let err = Submission::new("p1", "print(1)", "   ")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingField("language")));
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let submission = Submission::new("p1", "print(1)", "python");
        let entry = QueueEntry::encode(&submission).expect("encode");
        let value: serde_json::Value = serde_json::from_str(entry.payload()).expect("json");

        assert_eq!(value["problemId"], "p1");
        assert_eq!(value["code"], "print(1)");
        assert_eq!(value["language"], "python");
        assert!(value.get("enqueuedAt").is_none());
    }

    #[test]
    fn test_decodes_entries_without_timestamp() {
        let entry = QueueEntry::from_payload(
            r#"{"code":"print(2)","language":"python","problemId":"p2"}"#,
        );
        let submission = entry.decode().expect("decode");

        assert_eq!(submission, Submission::new("p2", "print(2)", "python"));
    }

    #[test]
    fn test_round_trip_preserves_timestamp() {
        let at = Utc
            .timestamp_opt(1_700_000_000, 123_456_789)
            .single()
            .expect("valid timestamp");
        let submission = Submission::new("p1", "fn main() {}\n\t\"quoted\" ünïcode", "rust")
            .stamped(at);

        let entry = QueueEntry::encode(&submission).expect("encode");
        assert_eq!(entry.decode().expect("decode"), submission);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(QueueEntry::from_payload("not json").decode().is_err());
        assert!(QueueEntry::from_payload(r#"{"problemId":"p1"}"#)
            .decode()
            .is_err());
    }

    #[test]
    fn test_fingerprint_distinguishes_deliveries() {
        let base = Submission::new("p1", "print(1)", "python");
        let now = Utc::now();
        let first = base.stamped(now);
        let second = base.stamped(now);

        assert_ne!(first.delivery_id, second.delivery_id);
        assert_eq!(first.fingerprint(), first.clone().fingerprint());
        assert_ne!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().expect("fingerprint").len(), 64);
    }

    #[test]
    fn test_fingerprint_survives_wire_round_trip() {
        let written = Submission::new("p1", "print(1)", "python").stamped(Utc::now());
        let entry = QueueEntry::encode(&written).expect("encode");
        let value: serde_json::Value = serde_json::from_str(entry.payload()).expect("json");

        assert!(value["deliveryId"].is_string());
        assert_eq!(
            entry.decode().expect("decode").fingerprint(),
            written.fingerprint()
        );
    }

    #[test]
    fn test_entries_without_delivery_id_have_no_fingerprint() {
        let entry = QueueEntry::from_payload(
            r#"{"problemId":"p1","code":"print(1)","language":"python"}"#,
        );
        assert!(entry.decode().expect("decode").fingerprint().is_none());
        assert!(Submission::new("p1", "print(1)", "python")
            .stamped(Utc::now())
            .fingerprint()
            .is_some());
    }

    #[test]
    fn test_processing_status_display() {
        assert_eq!(format!("{}", ProcessingStatus::Completed), "completed");
        assert_eq!(format!("{}", ProcessingStatus::Skipped), "skipped");
    }

    #[test]
    fn test_processing_results() {
        let submission = Submission::new("p1", "print(1)", "python");

        let done = ProcessingResult::completed(&submission, "worker-0", 1200);
        assert!(done.is_completed());
        assert_eq!(done.problem_id, "p1");
        assert_eq!(done.duration_ms, 1200);
        assert_eq!(done.fingerprint, None);

        let stamped = submission.stamped(Utc::now());
        let done = ProcessingResult::completed(&stamped, "worker-0", 5);
        assert_eq!(done.fingerprint, stamped.fingerprint());

        let skipped = ProcessingResult::skipped(&submission, "worker-1");
        assert!(!skipped.is_completed());
        assert_eq!(skipped.duration_ms, 0);
    }
}
