//! Runtime configuration for producers and worker pools.
//!
//! Values come from defaults, then environment variables, then CLI flags.

use std::time::Duration;

use thiserror::Error;

use crate::scheduler::{
    Broker, DeliveryKind, DeliveryMode, WorkerPoolConfig, DEFAULT_BLOCK_SLICE, DEFAULT_QUEUE_NAME,
};

/// Default broker address.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default lease duration under leased delivery.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration shared by the `submit`, `work`, `stats` and `reclaim` commands.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Redis connection URL.
    pub redis_url: String,
    /// Name of the shared queue.
    pub queue_name: String,
    /// Number of workers started by `work`.
    pub workers: usize,
    /// Delivery mode used by workers.
    pub delivery: DeliveryMode,
    /// Upper bound of one blocking broker call.
    pub block_slice: Duration,
    /// Per-submission processing limit.
    pub job_timeout: Option<Duration>,
    /// Grace period for in-flight submissions on shutdown.
    pub shutdown_timeout: Duration,
    /// Simulated work time of the logging processor.
    pub processing_time: Duration,
    /// Skip submissions that already completed in this process.
    pub deduplicate: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            workers: 4,
            delivery: DeliveryMode::AtMostOnce,
            block_slice: DEFAULT_BLOCK_SLICE,
            job_timeout: None,
            shutdown_timeout: Duration::from_secs(60),
            processing_time: Duration::from_secs(1),
            deduplicate: false,
        }
    }
}

impl QueueConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: Redis connection URL (default: redis://127.0.0.1:6379)
    /// - `JUDGE_QUEUE_NAME`: Queue name (default: problems)
    /// - `JUDGE_QUEUE_WORKERS`: Number of workers (default: 4)
    /// - `JUDGE_QUEUE_DELIVERY`: `at-most-once` or `leased` (default: at-most-once)
    /// - `JUDGE_QUEUE_LEASE_TTL_SECS`: Lease duration under leased delivery (default: 30)
    /// - `JUDGE_QUEUE_BLOCK_SLICE_MS`: Blocking slice in milliseconds (default: 1000)
    /// - `JUDGE_QUEUE_JOB_TIMEOUT_SECS`: Per-submission limit, unset for none
    /// - `JUDGE_QUEUE_SHUTDOWN_TIMEOUT_SECS`: Shutdown grace period (default: 60)
    /// - `JUDGE_QUEUE_PROCESSING_MS`: Simulated processing time (default: 1000)
    /// - `JUDGE_QUEUE_DEDUP`: Skip already processed submissions (default: false)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("REDIS_URL") {
            config.redis_url = val;
        }

        if let Some(val) = lookup("JUDGE_QUEUE_NAME") {
            config.queue_name = val;
        }

        if let Some(val) = lookup("JUDGE_QUEUE_WORKERS") {
            config.workers = parse_env_value(&val, "JUDGE_QUEUE_WORKERS")?;
        }

        let kind = match lookup("JUDGE_QUEUE_DELIVERY") {
            Some(val) => val
                .parse::<DeliveryKind>()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "JUDGE_QUEUE_DELIVERY".to_string(),
                    message,
                })?,
            None => DeliveryKind::AtMostOnce,
        };
        let ttl = match lookup("JUDGE_QUEUE_LEASE_TTL_SECS") {
            Some(val) => Duration::from_secs(parse_env_value(&val, "JUDGE_QUEUE_LEASE_TTL_SECS")?),
            None => DEFAULT_LEASE_TTL,
        };
        config.delivery = kind.with_ttl(ttl);

        if let Some(val) = lookup("JUDGE_QUEUE_BLOCK_SLICE_MS") {
            let ms: u64 = parse_env_value(&val, "JUDGE_QUEUE_BLOCK_SLICE_MS")?;
            config.block_slice = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("JUDGE_QUEUE_JOB_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "JUDGE_QUEUE_JOB_TIMEOUT_SECS")?;
            config.job_timeout = Some(Duration::from_secs(secs));
        }

        if let Some(val) = lookup("JUDGE_QUEUE_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "JUDGE_QUEUE_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("JUDGE_QUEUE_PROCESSING_MS") {
            let ms: u64 = parse_env_value(&val, "JUDGE_QUEUE_PROCESSING_MS")?;
            config.processing_time = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("JUDGE_QUEUE_DEDUP") {
            config.deduplicate = parse_env_bool(&val, "JUDGE_QUEUE_DEDUP")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::ValidationFailed(format!(
                "redis_url must start with redis:// or rediss://, got '{}'",
                self.redis_url
            )));
        }

        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_name cannot be empty".to_string(),
            ));
        }

        if self.workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "workers must be greater than 0".to_string(),
            ));
        }

        if self.block_slice.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "block_slice must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout <= self.block_slice {
            return Err(ConfigError::ValidationFailed(format!(
                "shutdown_timeout ({:?}) must be longer than block_slice ({:?})",
                self.shutdown_timeout, self.block_slice
            )));
        }

        if let Some(ttl) = self.delivery.lease_ttl() {
            if ttl.is_zero() {
                return Err(ConfigError::ValidationFailed(
                    "lease ttl must be greater than 0".to_string(),
                ));
            }
        }

        if self.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "job_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Builder method to set the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Builder method to set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Builder method to set the delivery mode.
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Builder method to set the blocking slice.
    pub fn with_block_slice(mut self, slice: Duration) -> Self {
        self.block_slice = slice;
        self
    }

    /// Builder method to set the per-submission timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Builder method to set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builder method to set the simulated processing time.
    pub fn with_processing_time(mut self, time: Duration) -> Self {
        self.processing_time = time;
        self
    }

    /// Builder method to enable or disable deduplication.
    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.deduplicate = enabled;
        self
    }

    /// Broker described by this configuration.
    pub fn broker(&self) -> Broker {
        Broker::redis(self.redis_url.clone())
    }

    /// Worker pool settings derived from this configuration.
    pub fn pool_config(&self) -> WorkerPoolConfig {
        let mut pool = WorkerPoolConfig::new(self.workers)
            .with_queue_name(self.queue_name.clone())
            .with_delivery(self.delivery)
            .with_block_slice(self.block_slice)
            .with_shutdown_timeout(self.shutdown_timeout);
        if let Some(timeout) = self.job_timeout {
            pool = pool.with_job_timeout(timeout);
        }
        pool
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
