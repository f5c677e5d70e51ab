//! Lexicon Coordination - Distributed Unique Counter
//!
//! Hands out strictly increasing codes to uncoordinated processes using only
//! "read current value" and "compare-and-set" on a shared coordination
//! service, plus the write lease that serializes persists per namespace.
//!
//! The counter is global: every namespace draws from the same sequence, so
//! codes minted by different jobs for different namespaces never collide
//! when their caches are merged later.

pub mod counter;
pub mod lease;
pub mod lmdb;
pub mod memory;
pub mod scheme;

pub use counter::{CounterPolicy, SharedCounter};
pub use lease::{lease_key, Held, Lease, LeaseData, LeaseState, Released};
pub use lmdb::{LmdbCoordinationService, LMDB_SCHEME};
pub use memory::{InMemoryCoordinationService, MEMORY_SCHEME};
pub use scheme::SchemeCoordinationService;

use async_trait::async_trait;
use lexicon_core::{HolderId, LexiconResult};
use std::time::Duration;

/// Entry point to a coordination service.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Open a session. Fails with `CoordinationUnavailable` if the service
    /// cannot be reached.
    async fn connect(&self, connect_string: &str) -> LexiconResult<Box<dyn CoordinationSession>>;
}

/// A connection with an explicit `start`/`stop` lifecycle.
///
/// Every operation other than `start` fails with `SessionNotStarted` until
/// the session has been started, and again after it has been stopped.
#[async_trait]
pub trait CoordinationSession: Send + Sync {
    async fn start(&mut self) -> LexiconResult<()>;

    async fn stop(&mut self) -> LexiconResult<()>;

    /// Current value of the counter at `path`; an unset counter reads as `0`.
    async fn get_count(&self, path: &str) -> LexiconResult<i32>;

    /// Set `path` to `new` only if it still holds `expected`.
    ///
    /// Returns `false` when another caller changed the counter first.
    async fn compare_and_set(&self, path: &str, expected: i32, new: i32) -> LexiconResult<bool>;

    /// Take the lease at `key`, or fail with `LeaseHeld` if someone else
    /// holds an unexpired lease there.
    async fn try_acquire_lease(
        &self,
        key: &str,
        holder: HolderId,
        ttl: Duration,
    ) -> LexiconResult<Lease<Held>>;

    /// Release a lease held by this caller.
    async fn release_lease(&self, lease: Lease<Held>) -> LexiconResult<Lease<Released>>;
}
