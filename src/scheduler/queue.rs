//! Shared FIFO queue of serialized submissions.
//!
//! This module provides the queue that producers append to and workers
//! compete on:
//!
//! - Atomic append at the tail, atomic blocking removal at the head
//! - Global FIFO removal order across every handle on the same queue name
//! - Two delivery modes: at-most-once (the entry is forgotten on pop) and
//!   leased (the entry is held until acked and redelivered if the lease
//!   expires)
//!
//! # Blocking
//!
//! Blocking dequeues are issued to the broker in bounded slices
//! (`block_slice`, 1s by default). An infinite wait is a loop of slices,
//! which lets [`JobQueue::dequeue_until`] observe a shutdown signal without
//! abandoning a broker command halfway.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use super::backend::{Broker, Lease, QueueBackend};
use super::shutdown::ShutdownSignal;
use super::submission::{QueueEntry, Submission};

/// Queue name shared by producers and workers unless configured otherwise.
pub const DEFAULT_QUEUE_NAME: &str = "problems";

/// Default upper bound for a single blocking broker call.
pub const DEFAULT_BLOCK_SLICE: Duration = Duration::from_secs(1);

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the broker.
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize a submission.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// A popped entry could not be parsed into a submission.
    #[error("Malformed queue entry: {0}")]
    MalformedEntry(String),
}

impl QueueError {
    /// Whether this error means the broker itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueueError::ConnectionFailed(_) | QueueError::RedisError(_))
    }
}

/// How long a dequeue may suspend the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingTimeout {
    /// Wait until an entry arrives.
    Infinite,
    /// Give up after the given duration.
    After(Duration),
}

impl From<Duration> for BlockingTimeout {
    fn from(timeout: Duration) -> Self {
        BlockingTimeout::After(timeout)
    }
}

/// What happens to an entry once a worker has dequeued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// The queue forgets the entry as soon as it is popped. A worker that
    /// dies before finishing loses the submission.
    #[default]
    AtMostOnce,
    /// The entry stays in flight under a lease until it is acked; if the
    /// lease expires it is returned to the head of the queue.
    Leased { ttl: Duration },
}

impl DeliveryMode {
    pub fn is_leased(&self) -> bool {
        matches!(self, DeliveryMode::Leased { .. })
    }

    pub fn lease_ttl(&self) -> Option<Duration> {
        match self {
            DeliveryMode::AtMostOnce => None,
            DeliveryMode::Leased { ttl } => Some(*ttl),
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::AtMostOnce => write!(f, "at-most-once"),
            DeliveryMode::Leased { ttl } => write!(f, "leased({}s)", ttl.as_secs()),
        }
    }
}

/// Kind of delivery, without the lease duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    AtMostOnce,
    Leased,
}

impl DeliveryKind {
    pub fn with_ttl(self, ttl: Duration) -> DeliveryMode {
        match self {
            DeliveryKind::AtMostOnce => DeliveryMode::AtMostOnce,
            DeliveryKind::Leased => DeliveryMode::Leased { ttl },
        }
    }
}

impl FromStr for DeliveryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "at-most-once" | "at_most_once" | "baseline" => Ok(DeliveryKind::AtMostOnce),
            "leased" | "lease" | "at-least-once" => Ok(DeliveryKind::Leased),
            other => Err(format!(
                "unknown delivery mode '{}', expected 'at-most-once' or 'leased'",
                other
            )),
        }
    }
}

/// Handle to the shared submission queue.
///
/// Each handle owns its own broker connection. Producers and workers should
/// open one handle each rather than sharing one across concurrent callers.
pub struct JobQueue {
    backend: Box<dyn QueueBackend>,
    queue_name: String,
    delivery: DeliveryMode,
    block_slice: Duration,
}

impl JobQueue {
    /// Wraps an already connected backend.
    pub fn new(backend: Box<dyn QueueBackend>, queue_name: impl Into<String>) -> Self {
        Self {
            backend,
            queue_name: queue_name.into(),
            delivery: DeliveryMode::default(),
            block_slice: DEFAULT_BLOCK_SLICE,
        }
    }

    /// Opens a new handle on `broker`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the broker is unreachable.
    pub async fn open(broker: &Broker, queue_name: &str) -> Result<Self, QueueError> {
        let backend = broker.connect(queue_name).await?;
        Ok(Self::new(backend, queue_name))
    }

    /// Connects to Redis with at-most-once delivery.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        Self::open(&Broker::redis(redis_url), queue_name).await
    }

    /// Sets the delivery mode.
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Sets the upper bound of a single blocking broker call.
    pub fn with_block_slice(mut self, slice: Duration) -> Self {
        self.block_slice = slice.max(Duration::from_millis(1));
        self
    }

    /// Appends an entry to the tail of the queue.
    ///
    /// Returns as soon as the broker acknowledged the append; never waits
    /// for a consumer.
    pub async fn enqueue(&self, entry: QueueEntry) -> Result<(), QueueError> {
        self.backend.push(entry.payload().to_string()).await
    }

    /// Serializes and appends a submission.
    pub async fn enqueue_submission(&self, submission: &Submission) -> Result<(), QueueError> {
        self.enqueue(QueueEntry::encode(submission)?).await
    }

    /// Appends several entries, in order, in one round trip.
    pub async fn enqueue_batch(&self, entries: Vec<QueueEntry>) -> Result<(), QueueError> {
        let payloads = entries
            .iter()
            .map(|entry| entry.payload().to_string())
            .collect();
        self.backend.push_many(payloads).await
    }

    /// Removes the entry at the head of the queue.
    ///
    /// Suspends the caller while the queue is empty, for at most `timeout`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(entry))` if an entry was dequeued
    /// - `Ok(None)` if the timeout expired with the queue still empty
    pub async fn dequeue(
        &self,
        timeout: impl Into<BlockingTimeout>,
    ) -> Result<Option<QueueEntry>, QueueError> {
        self.dequeue_inner(timeout.into(), None).await
    }

    /// Like [`dequeue`](Self::dequeue), but also returns `Ok(None)` within
    /// one blocking slice of `shutdown` firing.
    pub async fn dequeue_until(
        &self,
        timeout: impl Into<BlockingTimeout>,
        shutdown: &ShutdownSignal,
    ) -> Result<Option<QueueEntry>, QueueError> {
        self.dequeue_inner(timeout.into(), Some(shutdown)).await
    }

    async fn dequeue_inner(
        &self,
        timeout: BlockingTimeout,
        shutdown: Option<&ShutdownSignal>,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let deadline = match timeout {
            BlockingTimeout::Infinite => None,
            BlockingTimeout::After(d) => Some(Instant::now() + d),
        };

        loop {
            if shutdown.is_some_and(ShutdownSignal::is_triggered) {
                return Ok(None);
            }

            let slice = match deadline {
                None => self.block_slice,
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(self.block_slice),
            };

            if let Some(entry) = self.pop_once(slice).await? {
                return Ok(Some(entry));
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(None);
            }
        }
    }

    async fn pop_once(&self, slice: Duration) -> Result<Option<QueueEntry>, QueueError> {
        match self.delivery {
            DeliveryMode::AtMostOnce => Ok(self
                .backend
                .pop(slice)
                .await?
                .map(QueueEntry::from_payload)),
            DeliveryMode::Leased { ttl } => {
                let lease = Lease::new(ttl);
                let payload = self.backend.pop_leased(slice, &lease).await?;
                Ok(payload.map(|p| QueueEntry::from_payload(p).with_lease(lease.id)))
            }
        }
    }

    /// Settles a dequeued entry.
    ///
    /// Entries dequeued without a lease need no settlement and return
    /// `true`. For leased entries, `false` means the lease had already
    /// expired and the entry may be delivered again.
    pub async fn ack(&self, entry: &QueueEntry) -> Result<bool, QueueError> {
        match entry.lease() {
            Some(lease) => self.backend.ack(lease).await,
            None => Ok(true),
        }
    }

    /// Returns entries whose lease expired to the head of the queue.
    pub async fn reclaim_expired(&self) -> Result<usize, QueueError> {
        self.backend.reclaim_expired().await
    }

    /// Returns entries popped by a worker that died before leasing them.
    ///
    /// Call on startup, before workers begin dequeuing.
    pub async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        self.backend.recover_orphans().await
    }

    /// Returns the number of entries waiting in the queue.
    pub async fn len(&self) -> Result<usize, QueueError> {
        self.backend.len().await
    }

    /// Returns the number of entries currently held by workers.
    pub async fn in_flight_len(&self) -> Result<usize, QueueError> {
        self.backend.in_flight_len().await
    }

    /// Returns whether the queue is empty.
    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Deletes all pending and in-flight entries.
    ///
    /// **Warning**: This permanently deletes all submissions.
    pub async fn clear(&self) -> Result<(), QueueError> {
        self.backend.clear().await
    }

    /// Returns queue statistics.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (pending, in_flight) = tokio::try_join!(self.len(), self.in_flight_len())?;

        Ok(QueueStats {
            queue_name: self.queue_name.clone(),
            delivery: self.delivery.to_string(),
            pending,
            in_flight,
        })
    }

    /// Returns the queue name.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn delivery(&self) -> DeliveryMode {
        self.delivery
    }
}

/// Statistics about queue state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Name of the queue.
    pub queue_name: String,
    /// Delivery mode the queue is consumed with.
    pub delivery: String,
    /// Number of submissions waiting to be dequeued.
    pub pending: usize,
    /// Number of submissions dequeued under a lease and not yet acked.
    pub in_flight: usize,
}

impl QueueStats {
    /// Returns the total number of submissions held by the broker.
    pub fn total(&self) -> usize {
        self.pending + self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_queue(broker: &Broker) -> JobQueue {
        JobQueue::open(broker, DEFAULT_QUEUE_NAME)
            .await
            .expect("memory broker always connects")
            .with_block_slice(Duration::from_millis(20))
    }

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("refused"));
        assert!(err.is_unavailable());

        let err = QueueError::MalformedEntry("bad json".to_string());
        assert!(err.to_string().contains("bad json"));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_queue_stats() {
        let stats = QueueStats {
            queue_name: "problems".to_string(),
            delivery: "at-most-once".to_string(),
            pending: 10,
            in_flight: 3,
        };
        assert_eq!(stats.total(), 13);
    }

    #[test]
    fn test_delivery_mode() {
        assert_eq!(DeliveryMode::default(), DeliveryMode::AtMostOnce);
        assert!(!DeliveryMode::AtMostOnce.is_leased());
        assert_eq!(DeliveryMode::AtMostOnce.lease_ttl(), None);

        let leased = DeliveryMode::Leased {
            ttl: Duration::from_secs(30),
        };
        assert!(leased.is_leased());
        assert_eq!(leased.lease_ttl(), Some(Duration::from_secs(30)));
        assert_eq!(leased.to_string(), "leased(30s)");
        assert_eq!(DeliveryMode::AtMostOnce.to_string(), "at-most-once");
    }

    #[test]
    fn test_delivery_kind_parse() {
        assert_eq!(
            "at-most-once".parse::<DeliveryKind>(),
            Ok(DeliveryKind::AtMostOnce)
        );
        assert_eq!("LEASED".parse::<DeliveryKind>(), Ok(DeliveryKind::Leased));
        assert!("exactly-once".parse::<DeliveryKind>().is_err());

        assert_eq!(
            DeliveryKind::Leased.with_ttl(Duration::from_secs(5)),
            DeliveryMode::Leased {
                ttl: Duration::from_secs(5)
            }
        );
    }

    #[tokio::test]
    async fn test_two_submissions_dequeue_in_order() {
        let broker = Broker::memory();
        let queue = memory_queue(&broker).await;

        queue
            .enqueue(QueueEntry::from_payload(
                r#"{"problemId":"p1","code":"print(1)","language":"python"}"#,
            ))
            .await
            .expect("enqueue p1");
        queue
            .enqueue(QueueEntry::from_payload(
                r#"{"problemId":"p2","code":"print(2)","language":"python"}"#,
            ))
            .await
            .expect("enqueue p2");

        let first = queue
            .dequeue(BlockingTimeout::Infinite)
            .await
            .expect("dequeue")
            .expect("present");
        let second = queue
            .dequeue(BlockingTimeout::Infinite)
            .await
            .expect("dequeue")
            .expect("present");

        assert_eq!(first.decode().expect("decode").problem_id, "p1");
        assert_eq!(second.decode().expect("decode").problem_id, "p2");
        assert!(first.lease().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_times_out_on_empty_queue() {
        let broker = Broker::memory();
        let queue = memory_queue(&broker).await;

        let start = std::time::Instant::now();
        let entry = queue
            .dequeue(Duration::from_millis(200))
            .await
            .expect("dequeue");
        let elapsed = start.elapsed();

        assert!(entry.is_none());
        assert!(elapsed >= Duration::from_millis(190), "returned too early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "returned too late: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_dequeue_until_honours_shutdown() {
        let broker = Broker::memory();
        let queue = memory_queue(&broker).await;
        let controller = crate::scheduler::ShutdownController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move {
            queue
                .dequeue_until(BlockingTimeout::Infinite, &signal)
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        controller.trigger();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("dequeue should observe shutdown")
            .expect("join");
        assert!(result.expect("dequeue").is_none());
    }

    #[tokio::test]
    async fn test_leased_entry_carries_lease_and_acks() {
        let broker = Broker::memory();
        let queue = memory_queue(&broker).await.with_delivery(DeliveryMode::Leased {
            ttl: Duration::from_secs(30),
        });

        queue
            .enqueue_submission(&Submission::new("p1", "print(1)", "python"))
            .await
            .expect("enqueue");

        let entry = queue
            .dequeue(Duration::from_millis(100))
            .await
            .expect("dequeue")
            .expect("present");
        assert!(entry.lease().is_some());
        assert_eq!(queue.in_flight_len().await.expect("in flight"), 1);

        assert!(queue.ack(&entry).await.expect("ack"));
        assert_eq!(queue.in_flight_len().await.expect("in flight"), 0);
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let broker = Broker::memory();
        let queue = memory_queue(&broker).await;

        let entries = (0..3)
            .map(|i| {
                QueueEntry::encode(&Submission::new(format!("p{}", i), "x", "python"))
                    .expect("encode")
            })
            .collect();
        queue.enqueue_batch(entries).await.expect("batch");

        let stats = queue.stats().await.expect("stats");
        assert_eq!(stats.queue_name, "problems");
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.in_flight, 0);

        queue.clear().await.expect("clear");
        assert!(queue.is_empty().await.expect("is_empty"));
    }
}
