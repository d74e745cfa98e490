//! Error types shared across the submission pipeline.
//!
//! Queue, pool and configuration errors live next to the code that raises
//! them; this module holds the errors that cross component boundaries:
//! - Submission validation (producer pre-condition)
//! - Submission processing (worker side, never surfaced to producers)

use std::time::Duration;

use thiserror::Error;

/// A submission is missing a field that workers rely on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Submission field '{0}' is missing or empty")]
    MissingField(&'static str),
}

/// Errors raised by a `SubmissionProcessor`.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Processing failed: {0}")]
    Failed(String),
}
