//! Redis list backend.
//!
//! # Key layout
//!
//! - `{queue}`: Main list. Producers `LPUSH`, consumers pop from the right,
//!   which yields FIFO order.
//! - `{queue}:processing`: Entries moved by `BRPOPLPUSH` that have not been
//!   leased yet. Non-empty only while a worker is between its pop and its
//!   lease registration, or after that worker crashed.
//! - `{queue}:leases`: Sorted set of lease id → expiry (unix ms).
//! - `{queue}:lease_payloads`: Hash of lease id → payload.
//!
//! Lease registration, acknowledgment and reclamation run as Lua scripts so
//! each is atomic on the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::{Lease, LeaseId, QueueBackend};
use crate::scheduler::queue::QueueError;

/// Moves a popped payload from the processing list into the lease structures.
/// Returns 0 if the payload was already recovered by someone else.
const CLAIM_SCRIPT: &str = r"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 1 then
  redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
  redis.call('HSET', KEYS[3], ARGV[2], ARGV[1])
  return 1
end
return 0
";

const ACK_SCRIPT: &str = r"
local removed = redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
return removed
";

/// Returns every lease that expired at or before ARGV[1] to the head of the
/// main list, oldest expiry ending up first in line.
const RECLAIM_SCRIPT: &str = r"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for i = #expired, 1, -1 do
  local id = expired[i]
  local payload = redis.call('HGET', KEYS[2], id)
  redis.call('ZREM', KEYS[1], id)
  redis.call('HDEL', KEYS[2], id)
  if payload then
    redis.call('RPUSH', KEYS[3], payload)
  end
end
return #expired
";

const RECOVER_SCRIPT: &str = r"
local moved = 0
local payload = redis.call('LPOP', KEYS[1])
while payload do
  redis.call('RPUSH', KEYS[2], payload)
  moved = moved + 1
  payload = redis.call('LPOP', KEYS[1])
end
return moved
";

/// Queue handle backed by its own Redis connection.
pub struct RedisBackend {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    queue_name: String,
    processing_queue: String,
    leases_key: String,
    payloads_key: String,
}

impl RedisBackend {
    /// Opens a dedicated connection for the queue `queue_name`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Wraps an existing connection manager.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        Self {
            redis,
            queue_name: queue_name.to_string(),
            processing_queue: format!("{}:processing", queue_name),
            leases_key: format!("{}:leases", queue_name),
            payloads_key: format!("{}:lease_payloads", queue_name),
        }
    }

    /// Redis blocking commands take seconds; 0 would mean "forever".
    fn timeout_secs(timeout: Duration) -> f64 {
        timeout.as_secs_f64().max(0.001)
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn push(&self, payload: String) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, payload).await?;
        Ok(())
    }

    async fn push_many(&self, payloads: Vec<String>) -> Result<(), QueueError> {
        if payloads.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for payload in &payloads {
            pipe.lpush(&self.queue_name, payload).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.redis.clone();

        if timeout.is_zero() {
            let payload: Option<String> = conn.rpop(&self.queue_name, None).await?;
            return Ok(payload);
        }

        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.queue_name)
            .arg(Self::timeout_secs(timeout))
            .query_async(&mut conn)
            .await?;

        Ok(popped.map(|(_, payload)| payload))
    }

    async fn pop_leased(
        &self,
        timeout: Duration,
        lease: &Lease,
    ) -> Result<Option<String>, QueueError> {
        let mut conn = self.redis.clone();

        // BRPOPLPUSH atomically pops from the main list and parks the entry
        // in the processing list, so a crash before the claim loses nothing.
        let payload: Option<String> = if timeout.is_zero() {
            redis::cmd("RPOPLPUSH")
                .arg(&self.queue_name)
                .arg(&self.processing_queue)
                .query_async(&mut conn)
                .await?
        } else {
            redis::cmd("BRPOPLPUSH")
                .arg(&self.queue_name)
                .arg(&self.processing_queue)
                .arg(Self::timeout_secs(timeout))
                .query_async(&mut conn)
                .await?
        };

        let Some(payload) = payload else {
            return Ok(None);
        };

        let expires_at_ms = chrono::Utc::now().timestamp_millis()
            + i64::try_from(lease.ttl.as_millis()).unwrap_or(i64::MAX / 2);

        let claimed: i64 = Script::new(CLAIM_SCRIPT)
            .key(&self.processing_queue)
            .key(&self.leases_key)
            .key(&self.payloads_key)
            .arg(&payload)
            .arg(lease.id.as_str())
            .arg(expires_at_ms)
            .invoke_async(&mut conn)
            .await?;

        if claimed == 1 {
            Ok(Some(payload))
        } else {
            // Recovered back to the main list by another process in the
            // meantime; it will be delivered to someone else.
            tracing::warn!(
                queue = %self.queue_name,
                lease_id = %lease.id,
                "Popped entry was recovered before it could be leased"
            );
            Ok(None)
        }
    }

    async fn ack(&self, lease: &LeaseId) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let removed: i64 = Script::new(ACK_SCRIPT)
            .key(&self.leases_key)
            .key(&self.payloads_key)
            .arg(lease.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn reclaim_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let reclaimed: usize = Script::new(RECLAIM_SCRIPT)
            .key(&self.leases_key)
            .key(&self.payloads_key)
            .key(&self.queue_name)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(reclaimed)
    }

    async fn recover_orphans(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let recovered: usize = Script::new(RECOVER_SCRIPT)
            .key(&self.processing_queue)
            .key(&self.queue_name)
            .invoke_async(&mut conn)
            .await?;
        Ok(recovered)
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.queue_name).await?;
        Ok(len)
    }

    async fn in_flight_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let (leased, unclaimed): (usize, usize) = redis::pipe()
            .zcard(&self.leases_key)
            .llen(&self.processing_queue)
            .query_async(&mut conn)
            .await?;
        Ok(leased + unclaimed)
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.del(&self.queue_name)
            .del(&self.processing_queue)
            .del(&self.leases_key)
            .del(&self.payloads_key);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }
}
