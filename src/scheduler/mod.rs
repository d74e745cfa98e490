//! Submission queue: producers, the shared FIFO and the worker pool.
//!
//! - **SubmissionProducer**: validates submissions and appends them to the queue tail
//! - **JobQueue**: named FIFO over a broker, with blocking dequeue
//! - **WorkerPool**: workers that each take one submission at a time
//! - **SubmissionProcessor**: the step a worker runs for every submission
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Producer   │
//!                      │  (API/CLI)   │
//!                      └──────┬───────┘
//!                             │ LPUSH
//!                      ┌──────▼───────┐
//!                      │    Redis     │
//!                      │  "problems"  │
//!                      └──────┬───────┘
//!                             │ BRPOP / BRPOPLPUSH
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use judge_queue::scheduler::{
//!     Broker, JobQueue, LoggingProcessor, SubmissionProducer, WorkerPool, WorkerPoolConfig,
//! };
//! use std::sync::Arc;
//!
//! let broker = Broker::redis("redis://localhost:6379");
//!
//! let producer = SubmissionProducer::new(JobQueue::open(&broker, "problems").await?);
//! producer.submit("two-sum", "print(1)", "python").await?;
//!
//! let mut pool = WorkerPool::new(
//!     WorkerPoolConfig::new(4),
//!     broker,
//!     Arc::new(LoggingProcessor::default()),
//! );
//! pool.start().await?;
//!
//! // Graceful shutdown
//! pool.shutdown().await?;
//! ```
//!
//! # Delivery
//!
//! - **At-most-once** (default): an entry leaves the broker when it is
//!   dequeued; a worker crash mid-processing loses it
//! - **Leased**: an entry is parked under a lease until acknowledged and
//!   returns to the head of the queue once the lease expires

pub mod backend;
pub mod processor;
pub mod producer;
pub mod queue;
pub mod shutdown;
pub mod submission;
pub mod worker_pool;

// Re-export main types for convenience
pub use backend::{Broker, LeaseId, MemoryBackend, QueueBackend, RedisBackend};
pub use processor::{IdempotentProcessor, LoggingProcessor, SubmissionProcessor};
pub use producer::{SubmissionProducer, SubmitError};
pub use queue::{
    BlockingTimeout, DeliveryKind, DeliveryMode, JobQueue, QueueError, QueueStats,
    DEFAULT_BLOCK_SLICE, DEFAULT_QUEUE_NAME,
};
pub use shutdown::{ShutdownController, ShutdownSignal};
pub use submission::{ProcessingResult, ProcessingStatus, QueueEntry, Submission};
pub use worker_pool::{PoolError, PoolStats, Worker, WorkerExit, WorkerPool, WorkerPoolConfig};
