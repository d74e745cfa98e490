//! In-process queue backend.
//!
//! Mirrors the Redis layout with a `VecDeque` for pending entries and a map
//! of active leases. Blocking pops park on a `Notify` instead of polling.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Lease, LeaseId, QueueBackend};
use crate::scheduler::queue::QueueError;

#[derive(Debug, Default)]
struct MemoryState {
    /// Front is the head (next to dequeue), back is the tail.
    pending: VecDeque<String>,
    leases: HashMap<LeaseId, LeasedEntry>,
}

#[derive(Debug)]
struct LeasedEntry {
    payload: String,
    expires_at: Instant,
}

/// Queue store living inside the current process.
///
/// Clones share the same store; each clone acts as an independent handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    available: Arc<Notify>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn pop_inner(
        &self,
        timeout: Duration,
        lease: Option<&Lease>,
    ) -> Result<Option<String>, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(payload) = state.pending.pop_front() {
                    if let Some(lease) = lease {
                        state.leases.insert(
                            lease.id.clone(),
                            LeasedEntry {
                                payload: payload.clone(),
                                expires_at: Instant::now() + lease.ttl,
                            },
                        );
                    }
                    if !state.pending.is_empty() {
                        self.available.notify_one();
                    }
                    return Ok(Some(payload));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn push(&self, payload: String) -> Result<(), QueueError> {
        self.state.lock().await.pending.push_back(payload);
        self.available.notify_one();
        Ok(())
    }

    async fn push_many(&self, payloads: Vec<String>) -> Result<(), QueueError> {
        if payloads.is_empty() {
            return Ok(());
        }
        self.state.lock().await.pending.extend(payloads);
        self.available.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        self.pop_inner(timeout, None).await
    }

    async fn pop_leased(
        &self,
        timeout: Duration,
        lease: &Lease,
    ) -> Result<Option<String>, QueueError> {
        self.pop_inner(timeout, Some(lease)).await
    }

    async fn ack(&self, lease: &LeaseId) -> Result<bool, QueueError> {
        Ok(self.state.lock().await.leases.remove(lease).is_some())
    }

    async fn reclaim_expired(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let mut expired: Vec<(LeaseId, Instant)> = state
            .leases
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(id, entry)| (id.clone(), entry.expires_at))
            .collect();
        // Latest expiry is pushed first so the oldest claim ends up at the head.
        expired.sort_by(|a, b| b.1.cmp(&a.1));

        let count = expired.len();
        for (id, _) in expired {
            if let Some(entry) = state.leases.remove(&id) {
                state.pending.push_front(entry.payload);
            }
        }
        drop(state);

        if count > 0 {
            self.available.notify_one();
        }
        Ok(count)
    }

    async fn recover_orphans(&self) -> Result<usize, QueueError> {
        // Pop and lease happen under one lock, so nothing can be orphaned.
        Ok(0)
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.pending.len())
    }

    async fn in_flight_len(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.leases.len())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.pending.clear();
        state.leases.clear();
        Ok(())
    }
}
