//! Lexicon Test Utilities
//!
//! Shared test infrastructure for the lexicon workspace:
//! - Proptest generators for values, value sets and namespaces
//! - Fixture configuration rooted in a temporary directory
//! - Fault-injecting coordination wrapper
//! - Tracing initialization for tests

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;

// Re-export mocks from their source crates
pub use lexicon_coord::InMemoryCoordinationService;
pub use lexicon_storage::MemorySortedStore;

// Re-export core types for convenience
pub use lexicon_core::{
    Code, CoordinationError, HolderId, IndexEntry, LexiconConfig, LexiconError, LexiconResult,
    Namespace,
};

use lexicon_coord::{CoordinationService, CoordinationSession, Held, Lease, Released};

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`; later calls are no-ops.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Connect string of the in-memory coordination service used by fixtures.
pub const FIXTURE_CONNECT_STRING: &str = "memory://fixture";

/// Config writing under `<root>/out` and reading `<root>/upstream`, with a
/// zero-backoff counter.
pub fn fixture_config(root: &Path) -> LexiconConfig {
    let mut config = LexiconConfig::with_output_path(root.join("out"));
    config.storage.cache_paths = vec![root.join("upstream")];
    config.storage.map_size_mb = 8;
    config.coordination.connect_string = Some(FIXTURE_CONNECT_STRING.to_string());
    config.coordination.initial_backoff_ms = 0;
    config.coordination.max_backoff_ms = 0;
    config
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Coordination service whose first `failures` connects are refused.
///
/// Sessions it hands out can also be told to fail `stop` or `release_lease`
/// after the wrapped backend has done the work.
#[derive(Clone)]
pub struct FlakyCoordinationService {
    inner: Arc<dyn CoordinationService>,
    failures_left: Arc<AtomicU32>,
    fail_stop: Arc<AtomicBool>,
    fail_release: Arc<AtomicBool>,
}

impl FlakyCoordinationService {
    pub fn new(inner: Arc<dyn CoordinationService>, failures: u32) -> Self {
        Self {
            inner,
            failures_left: Arc::new(AtomicU32::new(failures)),
            fail_stop: Arc::new(AtomicBool::new(false)),
            fail_release: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Every session's `stop` reports `CoordinationUnavailable`.
    pub fn with_failing_stop(self) -> Self {
        self.fail_stop.store(true, Ordering::SeqCst);
        self
    }

    /// Every session's `release_lease` reports `CoordinationUnavailable`.
    pub fn with_failing_release(self) -> Self {
        self.fail_release.store(true, Ordering::SeqCst);
        self
    }

    pub fn failures_left(&self) -> u32 {
        self.failures_left.load(Ordering::SeqCst)
    }
}

fn injected(operation: &str) -> LexiconError {
    CoordinationError::Unavailable {
        connect_string: FIXTURE_CONNECT_STRING.to_string(),
        reason: format!("injected {} failure", operation),
    }
    .into()
}

#[async_trait]
impl CoordinationService for FlakyCoordinationService {
    async fn connect(&self, connect_string: &str) -> LexiconResult<Box<dyn CoordinationSession>> {
        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(CoordinationError::Unavailable {
                connect_string: connect_string.to_string(),
                reason: "injected connection failure".to_string(),
            }
            .into());
        }
        let inner = self.inner.connect(connect_string).await?;
        Ok(Box::new(FlakySession {
            inner,
            fail_stop: self.fail_stop.load(Ordering::SeqCst),
            fail_release: self.fail_release.load(Ordering::SeqCst),
        }))
    }
}

struct FlakySession {
    inner: Box<dyn CoordinationSession>,
    fail_stop: bool,
    fail_release: bool,
}

#[async_trait]
impl CoordinationSession for FlakySession {
    async fn start(&mut self) -> LexiconResult<()> {
        self.inner.start().await
    }

    async fn stop(&mut self) -> LexiconResult<()> {
        self.inner.stop().await?;
        if self.fail_stop {
            return Err(injected("stop"));
        }
        Ok(())
    }

    async fn get_count(&self, path: &str) -> LexiconResult<i32> {
        self.inner.get_count(path).await
    }

    async fn compare_and_set(&self, path: &str, expected: i32, new: i32) -> LexiconResult<bool> {
        self.inner.compare_and_set(path, expected, new).await
    }

    async fn try_acquire_lease(
        &self,
        key: &str,
        holder: HolderId,
        ttl: Duration,
    ) -> LexiconResult<Lease<Held>> {
        self.inner.try_acquire_lease(key, holder, ttl).await
    }

    async fn release_lease(&self, lease: Lease<Held>) -> LexiconResult<Lease<Released>> {
        let released = self.inner.release_lease(lease).await?;
        if self.fail_release {
            return Err(injected("release"));
        }
        Ok(released)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Generate a cache value: short, mixed case, sometimes non-ASCII.
pub fn arb_value() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "[a-zA-Z0-9 _-]{0,12}",
        1 => "[a-zé中ß]{1,6}",
    ]
}

/// Generate a set of distinct values.
pub fn arb_value_set(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    proptest::collection::btree_set(arb_value(), 0..=max)
}

/// Generate two disjoint non-empty value sets.
pub fn arb_disjoint_value_sets(
    max: usize,
) -> impl Strategy<Value = (BTreeSet<String>, BTreeSet<String>)> {
    proptest::collection::btree_set(arb_value(), 2..=max.max(2)).prop_map(|all| {
        let split = all.len() / 2;
        let mut left = all;
        let right = left.split_off(&left.iter().nth(split).cloned().unwrap_or_default());
        (left, right)
    })
}

/// Generate a valid namespace of one to three segments.
pub fn arb_namespace() -> impl Strategy<Value = Namespace> {
    proptest::collection::vec("[a-z][a-z0-9_]{0,7}", 1..=3).prop_filter_map(
        "segments form a valid namespace",
        |segments| Namespace::new(segments.join("/")).ok(),
    )
}
