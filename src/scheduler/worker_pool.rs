//! Worker pool for processing submissions from the shared queue.
//!
//! Each worker runs as an independent tokio task with its own queue handle
//! and pulls one submission at a time.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Shutdown signal observed between blocking slices
//! - Discard-and-continue on malformed entries and processing errors
//! - Lease reaper and orphan recovery under leased delivery
//! - Queue depth sampling
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ProcessingError;
use crate::metrics::MetricsCollector;

use super::backend::Broker;
use super::processor::SubmissionProcessor;
use super::queue::{
    BlockingTimeout, DeliveryMode, JobQueue, QueueError, DEFAULT_BLOCK_SLICE, DEFAULT_QUEUE_NAME,
};
use super::shutdown::{ShutdownController, ShutdownSignal};
use super::submission::{ProcessingStatus, QueueEntry};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to open a queue handle.
    #[error("Queue connection failed: {0}")]
    QueueConnection(#[from] QueueError),

    /// The pool configuration is unusable.
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Name of the shared queue.
    pub queue_name: String,
    /// Delivery mode used by every worker.
    pub delivery: DeliveryMode,
    /// Upper bound of one blocking broker call; also the shutdown latency
    /// of an idle worker.
    pub block_slice: Duration,
    /// Maximum time allowed for processing a single submission.
    pub job_timeout: Option<Duration>,
    /// Timeout for graceful shutdown. Must be longer than `block_slice` so
    /// an idle worker always leaves its blocking pop before being aborted.
    pub shutdown_timeout: Duration,
    /// How often expired leases are reclaimed. Defaults to half the lease TTL.
    pub reap_interval: Option<Duration>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            delivery: DeliveryMode::AtMostOnce,
            block_slice: DEFAULT_BLOCK_SLICE,
            job_timeout: None,
            shutdown_timeout: Duration::from_secs(60),
            reap_interval: None,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Sets the delivery mode.
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Sets the blocking slice.
    pub fn with_block_slice(mut self, slice: Duration) -> Self {
        self.block_slice = slice;
        self
    }

    /// Sets the per-submission timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the lease reaper interval.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = Some(interval);
        self
    }

    /// Effective reaper interval, or `None` when leases are not used.
    pub fn effective_reap_interval(&self) -> Option<Duration> {
        let ttl = self.delivery.lease_ttl()?;
        Some(
            self.reap_interval
                .unwrap_or(ttl / 2)
                .max(Duration::from_millis(10)),
        )
    }

    /// How often the pool samples queue depth and, when leased, reclaims
    /// expired leases.
    pub fn monitor_interval(&self) -> Duration {
        self.effective_reap_interval().unwrap_or(self.block_slice)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.num_workers == 0 {
            return Err(PoolError::InvalidConfig(
                "num_workers must be greater than 0".to_string(),
            ));
        }
        if self.queue_name.trim().is_empty() {
            return Err(PoolError::InvalidConfig(
                "queue_name cannot be empty".to_string(),
            ));
        }
        if self.block_slice.is_zero() {
            return Err(PoolError::InvalidConfig(
                "block_slice must be greater than 0".to_string(),
            ));
        }
        if self.shutdown_timeout <= self.block_slice {
            return Err(PoolError::InvalidConfig(
                "shutdown_timeout must be longer than block_slice".to_string(),
            ));
        }
        if let Some(ttl) = self.delivery.lease_ttl() {
            if ttl.is_zero() {
                return Err(PoolError::InvalidConfig(
                    "lease ttl must be greater than 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of worker loops still running.
    pub live_workers: usize,
    /// Number of workers currently processing a submission.
    pub active_workers: usize,
    /// Submissions processed successfully.
    pub jobs_completed: u64,
    /// Deliveries skipped because they had already been processed.
    pub jobs_skipped: u64,
    /// Submissions whose processing failed and were discarded.
    pub jobs_failed: u64,
    /// Entries discarded because they could not be decoded.
    pub entries_malformed: u64,
    /// Average processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of submissions handed to the processor.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_skipped + self.jobs_failed
    }

    /// Entries dropped without a successful run: malformed or failed.
    pub fn discarded(&self) -> u64 {
        self.entries_malformed + self.jobs_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        ((self.jobs_completed + self.jobs_skipped) as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_skipped: AtomicU64,
    jobs_failed: AtomicU64,
    entries_malformed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
    live_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_skipped: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            entries_malformed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
            live_workers: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, status: ProcessingStatus, duration: Duration) {
        match status {
            ProcessingStatus::Completed => self.jobs_completed.fetch_add(1, Ordering::SeqCst),
            ProcessingStatus::Skipped => self.jobs_skipped.fetch_add(1, Ordering::SeqCst),
        };
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_malformed(&self) {
        self.entries_malformed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn worker_started(&self) -> u64 {
        self.live_workers.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn worker_stopped(&self) -> u64 {
        self.live_workers.fetch_sub(1, Ordering::SeqCst) - 1
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let skipped = self.jobs_skipped.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let total_jobs = completed + skipped + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            live_workers: self.live_workers.load(Ordering::SeqCst) as usize,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            jobs_completed: completed,
            jobs_skipped: skipped,
            jobs_failed: failed,
            entries_malformed: self.entries_malformed.load(Ordering::SeqCst),
            average_job_duration: average_duration,
        }
    }
}

/// Why a worker loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The shutdown signal fired.
    Shutdown,
    /// The queue connection failed; the worker is gone until restarted.
    QueueLost(String),
}

/// Worker pool that runs several workers against one queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    broker: Broker,
    processor: Arc<dyn SubmissionProcessor>,
    shutdown: ShutdownController,
    worker_handles: Vec<JoinHandle<WorkerExit>>,
    monitor_handle: Option<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool. No connection is opened until `start`.
    ///
    /// # Arguments
    ///
    /// * `config` - Pool configuration
    /// * `broker` - Broker every worker opens its own handle on
    /// * `processor` - Step invoked for each submission
    pub fn new(
        config: WorkerPoolConfig,
        broker: Broker,
        processor: Arc<dyn SubmissionProcessor>,
    ) -> Self {
        Self {
            config,
            broker,
            processor,
            shutdown: ShutdownController::new(),
            worker_handles: Vec::new(),
            monitor_handle: None,
            stats: Arc::new(SharedPoolStats::new()),
            metrics: MetricsCollector::new(),
            is_running: AtomicBool::new(false),
        }
    }

    async fn open_queue(&self) -> Result<JobQueue, PoolError> {
        Ok(JobQueue::open(&self.broker, &self.config.queue_name)
            .await?
            .with_delivery(self.config.delivery)
            .with_block_slice(self.config.block_slice))
    }

    /// Starts all workers in the pool.
    ///
    /// A monitor task samples queue depth. Under leased delivery, entries
    /// orphaned by crashed workers are recovered first and the monitor also
    /// reclaims expired leases.
    ///
    /// # Errors
    ///
    /// - `PoolError::AlreadyRunning` if the pool is already running
    /// - `PoolError::InvalidConfig` if the configuration is unusable
    /// - `PoolError::QueueConnection` if a queue handle cannot be opened;
    ///   workers spawned before the failure are stopped again
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }
        self.config.validate()?;
        self.shutdown.reset();

        let control = self.open_queue().await?;
        let reclaim = self.config.delivery.is_leased();
        if reclaim {
            match control.recover_in_flight().await {
                Ok(recovered) if recovered > 0 => {
                    info!(recovered = recovered, "Recovered orphaned in-flight submissions");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to recover in-flight submissions"),
            }
        }
        self.monitor_handle = Some(tokio::spawn(monitor_queue(
            control,
            self.config.monitor_interval(),
            reclaim,
            self.shutdown.signal(),
            self.metrics.clone(),
        )));

        for i in 0..self.config.num_workers {
            let queue = match self.open_queue().await {
                Ok(queue) => queue,
                Err(e) => {
                    self.abort_all();
                    return Err(e);
                }
            };

            let worker = Worker::new(
                format!("worker-{}", i),
                queue,
                Arc::clone(&self.processor),
                self.shutdown.signal(),
            )
            .with_job_timeout(self.config.job_timeout)
            .with_stats(Arc::clone(&self.stats));

            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            num_workers = self.config.num_workers,
            queue = %self.config.queue_name,
            delivery = %self.config.delivery,
            broker = %self.broker.describe(),
            "Worker pool started"
        );

        Ok(())
    }

    fn abort_all(&mut self) {
        self.shutdown.trigger();
        for handle in self.worker_handles.drain(..) {
            handle.abort();
        }
        if let Some(monitor) = self.monitor_handle.take() {
            monitor.abort();
        }
    }

    /// Gracefully shuts down all workers.
    ///
    /// Sends the shutdown signal and waits for workers to finish the
    /// submission they currently hold. Idle workers stop within one
    /// blocking slice.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout; remaining workers are aborted.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");
        self.shutdown.trigger();

        let handles: Vec<_> = self.worker_handles.drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let result = tokio::time::timeout(
            self.config.shutdown_timeout,
            futures::future::join_all(handles),
        )
        .await;

        if let Some(monitor) = self.monitor_handle.take() {
            monitor.abort();
        }
        self.is_running.store(false, Ordering::SeqCst);
        self.metrics.update_workers(0);

        match result {
            Ok(joined) => {
                for outcome in joined {
                    if let Err(e) = outcome {
                        error!(error = %e, "Worker task panicked during shutdown");
                    }
                }
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                for abort in aborts {
                    abort.abort();
                }
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Waits until every worker loop has ended on its own and returns how
    /// each one ended.
    ///
    /// Cancel safe: workers not yet joined stay owned by the pool, so
    /// `shutdown` still reaches them.
    pub async fn wait(&mut self) -> Vec<WorkerExit> {
        let mut exits = Vec::with_capacity(self.worker_handles.len());
        while let Some(handle) = self.worker_handles.last_mut() {
            let joined = handle.await;
            self.worker_handles.pop();
            match joined {
                Ok(exit) => exits.push(exit),
                Err(e) => exits.push(WorkerExit::QueueLost(format!("worker task failed: {}", e))),
            }
        }
        if let Some(monitor) = self.monitor_handle.take() {
            monitor.abort();
        }
        self.is_running.store(false, Ordering::SeqCst);
        exits
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Scales the pool to a new number of workers.
    ///
    /// Running pools are stopped gracefully and restarted with the new
    /// count; nothing is dequeued while the pool restarts.
    pub async fn scale(&mut self, num_workers: usize) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            self.config.num_workers = num_workers;
            return Ok(());
        }

        if num_workers == self.config.num_workers {
            return Ok(());
        }

        info!(
            current = self.config.num_workers,
            target = num_workers,
            "Scaling worker pool"
        );

        self.shutdown().await?;
        self.config.num_workers = num_workers;
        self.start().await?;

        Ok(())
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

/// Samples queue depth until shutdown and, under leased delivery, returns
/// expired leases to the queue.
async fn monitor_queue(
    queue: JobQueue,
    interval: Duration,
    reclaim: bool,
    mut shutdown: ShutdownSignal,
    metrics: MetricsCollector,
) {
    debug!(
        interval_ms = interval.as_millis() as u64,
        reclaim = reclaim,
        "Queue monitor started"
    );

    loop {
        if let Ok(depth) = queue.len().await {
            metrics.update_queue_depth(queue.queue_name(), depth);
        }

        tokio::select! {
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if !reclaim {
            continue;
        }
        match queue.reclaim_expired().await {
            Ok(0) => {}
            Ok(reclaimed) => {
                metrics.record_reclaimed(reclaimed);
                warn!(
                    queue = %queue.queue_name(),
                    reclaimed = reclaimed,
                    "Reclaimed submissions with expired leases"
                );
            }
            Err(e) => error!(error = %e, "Failed to reclaim expired leases"),
        }
    }

    debug!("Queue monitor stopped");
}

/// A single worker that processes submissions from the queue.
pub struct Worker {
    /// Unique identifier for this worker.
    id: String,
    /// This worker's own queue handle.
    queue: JobQueue,
    processor: Arc<dyn SubmissionProcessor>,
    shutdown: ShutdownSignal,
    /// Maximum time for processing a single submission.
    job_timeout: Option<Duration>,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Worker {
    /// Creates a new worker.
    pub fn new(
        id: impl Into<String>,
        queue: JobQueue,
        processor: Arc<dyn SubmissionProcessor>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            processor,
            shutdown,
            job_timeout: None,
            stats: Arc::new(SharedPoolStats::new()),
            metrics: MetricsCollector::new(),
        }
    }

    /// Sets the per-submission timeout.
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    fn with_stats(mut self, stats: Arc<SharedPoolStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Main worker loop.
    ///
    /// Dequeues and processes submissions one at a time until the shutdown
    /// signal fires or the queue connection fails.
    pub async fn run(self) -> WorkerExit {
        let live = self.stats.worker_started();
        self.metrics.update_workers(live as usize);
        info!(
            worker_id = %self.id,
            queue = %self.queue.queue_name(),
            delivery = %self.queue.delivery(),
            "Worker started"
        );

        let exit = loop {
            if self.shutdown.is_triggered() {
                info!(worker_id = %self.id, "Worker received shutdown signal");
                break WorkerExit::Shutdown;
            }

            match self
                .queue
                .dequeue_until(BlockingTimeout::Infinite, &self.shutdown)
                .await
            {
                Ok(Some(entry)) => {
                    if let Err(e) = self.handle_entry(entry).await {
                        error!(
                            worker_id = %self.id,
                            error = %e,
                            "Failed to settle submission, worker exiting"
                        );
                        break WorkerExit::QueueLost(e.to_string());
                    }
                }
                // Only returned once shutdown fired; checked at the top.
                Ok(None) => {}
                Err(e) => {
                    error!(
                        worker_id = %self.id,
                        error = %e,
                        "Queue connection lost, worker exiting"
                    );
                    break WorkerExit::QueueLost(e.to_string());
                }
            }
        };

        let live = self.stats.worker_stopped();
        self.metrics.update_workers(live as usize);
        info!(worker_id = %self.id, exit = ?exit, "Worker stopped");
        exit
    }

    /// Decodes, processes and settles one entry.
    ///
    /// Only queue failures are returned; decoding and processing failures
    /// are logged and the entry is discarded.
    async fn handle_entry(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let submission = match entry
            .decode()
            .map_err(|e| QueueError::MalformedEntry(e.to_string()))
            .and_then(|s| {
                s.validate()
                    .map_err(|e| QueueError::MalformedEntry(e.to_string()))?;
                Ok(s)
            }) {
            Ok(submission) => submission,
            Err(e) => {
                warn!(
                    worker_id = %self.id,
                    error = %e,
                    payload_bytes = entry.payload().len(),
                    "Discarding malformed queue entry"
                );
                self.stats.record_malformed();
                self.metrics.record_discarded("malformed");
                self.settle(&entry).await?;
                return Ok(());
            }
        };

        debug!(
            worker_id = %self.id,
            problem_id = %submission.problem_id,
            age_ms = submission.age().map(|age| age.num_milliseconds()),
            "Dequeued submission"
        );

        self.stats.increment_active();
        self.metrics.inc_jobs_in_progress();
        let start_time = Instant::now();

        let outcome = match self.job_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.processor.process(&submission, &self.id))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProcessingError::Timeout(limit)),
                }
            }
            None => self.processor.process(&submission, &self.id).await,
        };

        let duration = start_time.elapsed();
        self.stats.decrement_active();
        self.metrics.dec_jobs_in_progress();

        match outcome {
            Ok(result) => {
                self.stats.record_completion(result.status, duration);
                self.metrics.record_processed(
                    &result.status.to_string(),
                    &submission.language,
                    duration.as_secs_f64(),
                );
                info!(
                    worker_id = %self.id,
                    problem_id = %submission.problem_id,
                    status = %result.status,
                    duration_ms = duration.as_millis() as u64,
                    "Submission processed"
                );
            }
            Err(e) => {
                self.stats.record_failure(duration);
                self.metrics
                    .record_processed("failed", &submission.language, duration.as_secs_f64());
                self.metrics.record_discarded("processing_error");
                warn!(
                    worker_id = %self.id,
                    problem_id = %submission.problem_id,
                    error = %e,
                    "Processing failed, discarding submission"
                );
            }
        }

        self.settle(&entry).await
    }

    /// Acknowledges a leased entry; no-op under at-most-once delivery.
    async fn settle(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        if !self.queue.ack(entry).await? {
            warn!(
                worker_id = %self.id,
                lease_id = ?entry.lease(),
                "Lease expired before ack, submission may be delivered again"
            );
        }
        Ok(())
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();

        assert_eq!(config.num_workers, 4);
        assert_eq!(config.queue_name, "problems");
        assert_eq!(config.delivery, DeliveryMode::AtMostOnce);
        assert_eq!(config.block_slice, Duration::from_secs(1));
        assert_eq!(config.job_timeout, None);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(60));
        assert_eq!(config.effective_reap_interval(), None);
        assert_eq!(config.monitor_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(8)
            .with_queue_name("my_queue")
            .with_delivery(DeliveryMode::Leased {
                ttl: Duration::from_secs(30),
            })
            .with_block_slice(Duration::from_millis(250))
            .with_job_timeout(Duration::from_secs(3600))
            .with_shutdown_timeout(Duration::from_secs(120));

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.queue_name, "my_queue");
        assert_eq!(config.block_slice, Duration::from_millis(250));
        assert_eq!(config.job_timeout, Some(Duration::from_secs(3600)));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(120));
        assert_eq!(config.effective_reap_interval(), Some(Duration::from_secs(15)));

        let config = config.with_reap_interval(Duration::from_secs(2));
        assert_eq!(config.effective_reap_interval(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_worker_pool_config_validation() {
        assert!(WorkerPoolConfig::new(0).validate().is_err());
        assert!(WorkerPoolConfig::new(1)
            .with_queue_name(" ")
            .validate()
            .is_err());
        assert!(WorkerPoolConfig::new(1)
            .with_block_slice(Duration::ZERO)
            .validate()
            .is_err());
        assert!(WorkerPoolConfig::new(1)
            .with_delivery(DeliveryMode::Leased { ttl: Duration::ZERO })
            .validate()
            .is_err());
        assert!(WorkerPoolConfig::new(1)
            .with_shutdown_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(WorkerPoolConfig::new(1)
            .with_block_slice(Duration::from_millis(500))
            .with_shutdown_timeout(Duration::from_millis(500))
            .validate()
            .is_err());
        assert!(WorkerPoolConfig::new(1)
            .with_block_slice(Duration::from_millis(500))
            .with_shutdown_timeout(Duration::from_millis(501))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();

        assert_eq!(stats.num_workers, 0);
        assert_eq!(stats.live_workers, 0);
        assert_eq!(stats.active_workers, 0);
        assert_eq!(stats.total_processed(), 0);
        assert_eq!(stats.average_job_duration, Duration::ZERO);
        assert!((stats.success_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_stats_calculations() {
        let stats = PoolStats {
            num_workers: 4,
            live_workers: 4,
            active_workers: 2,
            jobs_completed: 70,
            jobs_skipped: 10,
            jobs_failed: 20,
            entries_malformed: 3,
            average_job_duration: Duration::from_secs(1),
        };

        assert_eq!(stats.total_processed(), 100);
        assert_eq!(stats.discarded(), 23);
        assert!((stats.success_rate() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shared_pool_stats() {
        let stats = SharedPoolStats::new();

        stats.record_completion(ProcessingStatus::Completed, Duration::from_secs(10));
        stats.record_completion(ProcessingStatus::Skipped, Duration::from_secs(20));
        stats.record_failure(Duration::from_secs(5));
        stats.record_malformed();

        let pool_stats = stats.to_pool_stats(4);

        assert_eq!(pool_stats.num_workers, 4);
        assert_eq!(pool_stats.jobs_completed, 1);
        assert_eq!(pool_stats.jobs_skipped, 1);
        assert_eq!(pool_stats.jobs_failed, 1);
        assert_eq!(pool_stats.entries_malformed, 1);
        // Average: (10000 + 20000 + 5000) / 3 = 11666 ms
        assert!(pool_stats.average_job_duration.as_millis() > 11000);
        assert!(pool_stats.average_job_duration.as_millis() < 12000);
    }

    #[test]
    fn test_shared_pool_stats_worker_counts() {
        let stats = SharedPoolStats::new();

        assert_eq!(stats.worker_started(), 1);
        assert_eq!(stats.worker_started(), 2);
        stats.increment_active();
        assert_eq!(stats.to_pool_stats(2).active_workers, 1);
        stats.decrement_active();

        assert_eq!(stats.worker_stopped(), 1);
        assert_eq!(stats.to_pool_stats(2).live_workers, 1);
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = PoolError::NotRunning;
        assert!(err.to_string().contains("not running"));

        let err = PoolError::ShutdownTimeout(Duration::from_secs(60));
        assert!(err.to_string().contains("60"));

        let err = PoolError::InvalidConfig("num_workers".to_string());
        assert!(err.to_string().contains("num_workers"));
    }
}
