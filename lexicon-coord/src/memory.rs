//! In-process coordination service for tests and single-host runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lexicon_core::{CoordinationError, HolderId, LexiconResult};
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::{CoordinationService, CoordinationSession, Held, Lease, LeaseData, Released};

/// Scheme prefix routed to [`InMemoryCoordinationService`].
pub const MEMORY_SCHEME: &str = "memory://";

static PROCESS_SERVICE: Lazy<InMemoryCoordinationService> =
    Lazy::new(InMemoryCoordinationService::new);

#[derive(Debug, Default)]
struct SharedState {
    counters: Mutex<HashMap<String, i32>>,
    leases: Mutex<HashMap<String, LeaseData>>,
    unavailable: AtomicBool,
    /// Swaps still to be lost to a simulated competitor.
    contention: AtomicU32,
}

/// Coordination state shared by every clone of the service.
///
/// Clones behave like separate clients of one coordination cluster.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCoordinationService {
    state: Arc<SharedState>,
}

impl InMemoryCoordinationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// The service behind every `memory://` connect string in this process.
    pub fn process_shared() -> Self {
        PROCESS_SERVICE.clone()
    }

    /// Make `connect` fail with `CoordinationUnavailable` while `false`.
    pub fn set_available(&self, available: bool) {
        self.state.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make the next `n` compare-and-set calls lose to a competitor that
    /// takes the observed value first.
    pub fn inject_contention(&self, n: u32) {
        self.state.contention.store(n, Ordering::SeqCst);
    }

    pub async fn counter_value(&self, path: &str) -> i32 {
        self.state
            .counters
            .lock()
            .await
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub async fn set_counter(&self, path: &str, value: i32) {
        self.state
            .counters
            .lock()
            .await
            .insert(path.to_string(), value);
    }

    /// Holder of the unexpired lease at `key`, if any.
    pub async fn lease_holder(&self, key: &str) -> Option<HolderId> {
        let now = Utc::now();
        self.state
            .leases
            .lock()
            .await
            .get(key)
            .filter(|data| !data.is_expired(now))
            .map(|data| data.holder)
    }

    fn check_available(&self, connect_string: &str) -> LexiconResult<()> {
        if self.state.unavailable.load(Ordering::SeqCst) {
            return Err(CoordinationError::Unavailable {
                connect_string: connect_string.to_string(),
                reason: "service marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn take_contention(&self) -> bool {
        self.state
            .contention
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CoordinationService for InMemoryCoordinationService {
    async fn connect(&self, connect_string: &str) -> LexiconResult<Box<dyn CoordinationSession>> {
        self.check_available(connect_string)?;
        Ok(Box::new(InMemorySession {
            service: self.clone(),
            started: false,
        }))
    }
}

struct InMemorySession {
    service: InMemoryCoordinationService,
    started: bool,
}

impl InMemorySession {
    fn ensure_started(&self) -> LexiconResult<()> {
        if !self.started {
            return Err(CoordinationError::SessionNotStarted.into());
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationSession for InMemorySession {
    async fn start(&mut self) -> LexiconResult<()> {
        self.service.check_available(MEMORY_SCHEME)?;
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> LexiconResult<()> {
        self.started = false;
        Ok(())
    }

    async fn get_count(&self, path: &str) -> LexiconResult<i32> {
        self.ensure_started()?;
        Ok(self.service.counter_value(path).await)
    }

    async fn compare_and_set(&self, path: &str, expected: i32, new: i32) -> LexiconResult<bool> {
        self.ensure_started()?;
        let mut counters = self.service.state.counters.lock().await;
        let current = counters.entry(path.to_string()).or_insert(0);

        if self.service.take_contention() {
            // A competitor wins the observed value.
            if *current == expected {
                *current = current.saturating_add(1);
            }
            return Ok(false);
        }

        if *current != expected {
            return Ok(false);
        }
        *current = new;
        Ok(true)
    }

    async fn try_acquire_lease(
        &self,
        key: &str,
        holder: HolderId,
        ttl: Duration,
    ) -> LexiconResult<Lease<Held>> {
        self.ensure_started()?;
        let now = Utc::now();
        let mut leases = self.service.state.leases.lock().await;

        if let Some(existing) = leases.get(key) {
            if !existing.is_available_to(holder, now) {
                return Err(CoordinationError::LeaseHeld {
                    key: key.to_string(),
                    holder: existing.holder.to_string(),
                }
                .into());
            }
        }

        let data = LeaseData::new(key, holder, now, ttl);
        leases.insert(key.to_string(), data.clone());
        Ok(Lease::new(data))
    }

    async fn release_lease(&self, lease: Lease<Held>) -> LexiconResult<Lease<Released>> {
        self.ensure_started()?;
        let mut leases = self.service.state.leases.lock().await;
        // Only clear the record if it is still ours; an expired lease may
        // have been taken over.
        if leases.get(lease.key()).is_some_and(|l| l.holder == lease.holder()) {
            leases.remove(lease.key());
        }
        Ok(lease.release())
    }
}
