//! judge-queue: producer/worker submission queue for an online judge.
//!
//! Producers append code submissions to a named Redis list; a pool of
//! workers takes them off one at a time and hands each to a
//! [`scheduler::SubmissionProcessor`].

pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scheduler;

// Re-export commonly used error types
pub use config::ConfigError;
pub use error::{ProcessingError, ValidationError};
pub use scheduler::{PoolError, QueueError, SubmitError};
