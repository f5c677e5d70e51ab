//! Lexicon Index - Sorted Index Cache
//!
//! Maps string values to compact integer codes for one namespace. Codes are
//! minted from a global counter shared by every job, and each persist writes
//! its batch in lexicographic value order so that, within one batch, code
//! order equals value order.
//!
//! ```text
//! load_from_storage ──→ CacheUniverse (read-only, shared)
//! add_value(s)      ──→ pending set (sorted, deduplicated, no I/O)
//! persist           ──→ one code per pending value ──→ write location
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use lexicon_coord::{
    lease_key, CoordinationService, CoordinationSession, SchemeCoordinationService, SharedCounter,
};
use lexicon_core::{
    new_holder_id, Code, CacheUniverse, HolderId, IndexEntry, LexiconConfig, LexiconResult,
    Namespace,
};
use lexicon_storage::{
    ConfiguredPathResolver, LmdbSortedStore, Location, PathResolver, SortedStore,
};

// ============================================================================
// SORTED INDEX CACHE
// ============================================================================

/// Value/code cache for one namespace.
///
/// One instance per task. Instances in different processes bound to the same
/// namespace share codes through storage and the coordination service, never
/// through memory.
pub struct SortedIndexCache {
    namespace: Namespace,
    config: LexiconConfig,
    store: Arc<dyn SortedStore>,
    resolver: Arc<dyn PathResolver>,
    coordination: Arc<dyn CoordinationService>,
    counter: SharedCounter,
    /// Identifies this instance as a write lease holder.
    holder: HolderId,
    /// `None` until the first successful load.
    universe: Option<Arc<CacheUniverse>>,
    pending: BTreeSet<String>,
}

impl std::fmt::Debug for SortedIndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedIndexCache")
            .field("namespace", &self.namespace)
            .field("holder", &self.holder)
            .field("loaded", &self.is_loaded())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl SortedIndexCache {
    /// Create a cache with explicit collaborators.
    pub fn new(
        namespace: Namespace,
        config: LexiconConfig,
        store: Arc<dyn SortedStore>,
        resolver: Arc<dyn PathResolver>,
        coordination: Arc<dyn CoordinationService>,
    ) -> Self {
        let counter = SharedCounter::from_config(&config.coordination);
        Self {
            namespace,
            config,
            store,
            resolver,
            coordination,
            counter,
            holder: new_holder_id(),
            universe: None,
            pending: BTreeSet::new(),
        }
    }

    /// Create a cache backed by LMDB, the configured paths and the
    /// scheme-dispatching coordination service.
    pub fn from_config(namespace: Namespace, config: LexiconConfig) -> Self {
        let store = Arc::new(LmdbSortedStore::new(config.storage.map_size_mb));
        let resolver = Arc::new(ConfiguredPathResolver::from_config(&config.storage));
        Self::new(
            namespace,
            config,
            store,
            resolver,
            Arc::new(SchemeCoordinationService::default()),
        )
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn is_loaded(&self) -> bool {
        self.universe.is_some()
    }

    // ------------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------------

    /// Merge every upstream location plus this job's own into the universe.
    ///
    /// Missing locations are created empty. On failure the previously loaded
    /// universe, if any, stays in place.
    pub async fn load_from_storage(&mut self) -> LexiconResult<()> {
        let locations = self.resolver.read_locations(&self.namespace);
        tracing::info!(
            namespace = %self.namespace,
            locations = locations.len(),
            "Loading cache"
        );

        let universe = self.store.open_for_read(&locations).await?;

        tracing::info!(
            namespace = %self.namespace,
            entries = universe.len(),
            "Cache loaded"
        );
        self.universe = Some(Arc::new(universe));
        Ok(())
    }

    /// The loaded universe; empty before the first load.
    pub fn universe(&self) -> Arc<CacheUniverse> {
        self.universe
            .clone()
            .unwrap_or_else(|| Arc::new(CacheUniverse::empty()))
    }

    /// Code of `value` in the loaded universe, or [`Code::NOT_FOUND`].
    ///
    /// Values added since the last load are not visible here.
    pub fn get_index_for_value(&self, value: &str) -> Code {
        self.universe
            .as_ref()
            .map_or(Code::NOT_FOUND, |u| u.code_for(value))
    }

    pub fn get_item(&self, code: Code) -> Option<&str> {
        self.universe.as_ref().and_then(|u| u.get(code))
    }

    // ------------------------------------------------------------------------
    // Pending set
    // ------------------------------------------------------------------------

    pub fn add_value(&mut self, value: impl Into<String>) {
        self.pending.insert(value.into());
    }

    pub fn add_values<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.extend(values.into_iter().map(Into::into));
    }

    /// Pending values in lexicographic order.
    pub fn pending(&self) -> impl Iterator<Item = &str> + '_ {
        self.pending.iter().map(String::as_str)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop pending values the loaded universe already has a code for.
    ///
    /// Returns how many were dropped.
    pub fn discard_known(&mut self) -> usize {
        let Some(universe) = self.universe.as_ref() else {
            return 0;
        };
        let before = self.pending.len();
        self.pending.retain(|value| !universe.contains_value(value));
        before - self.pending.len()
    }

    // ------------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------------

    /// Mint one code per pending value and append the batch to this job's
    /// location.
    ///
    /// Returns the written batch in value order and clears the pending set.
    /// An empty pending set returns an empty batch without touching the
    /// coordination service or storage. On failure the pending set is kept;
    /// codes minted before the failure stay consumed. Once the batch is
    /// committed, failing to release the lease or stop the session is only
    /// logged.
    ///
    /// Callers must not run two persists for one namespace at once. With the
    /// write lease enabled a second writer fails with `LeaseHeld` instead.
    pub async fn persist(&mut self) -> LexiconResult<Vec<IndexEntry>> {
        let connect_string = self.config.require_connect_string()?.to_string();
        if self.pending.is_empty() {
            tracing::debug!(namespace = %self.namespace, "Nothing pending to persist");
            return Ok(Vec::new());
        }
        let location = self.resolver.write_location(&self.namespace);

        let mut session = self.coordination.connect(&connect_string).await?;
        let result = match session.start().await {
            Ok(()) => self.write_batch(session.as_ref(), &location).await,
            Err(e) => Err(e),
        };

        let stopped = session.stop().await;
        let batch = match (result, stopped) {
            (Ok(batch), Ok(())) => batch,
            (Ok(batch), Err(stop_err)) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    error = %stop_err,
                    "Failed to stop coordination session after committed persist"
                );
                batch
            }
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(stop_err)) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    error = %stop_err,
                    "Failed to stop coordination session after persist error"
                );
                return Err(e);
            }
        };

        self.pending.clear();
        Ok(batch)
    }

    async fn write_batch(
        &self,
        session: &dyn CoordinationSession,
        location: &Location,
    ) -> LexiconResult<Vec<IndexEntry>> {
        if !self.config.write_lease.enabled {
            return self.write_entries(session, location).await;
        }

        let key = lease_key(&self.config.write_lease.key_prefix, &self.namespace);
        let lease = session
            .try_acquire_lease(&key, self.holder, self.config.write_lease.ttl())
            .await?;
        tracing::debug!(lease = %key, holder = %self.holder, "Write lease acquired");

        let result = self.write_entries(session, location).await;
        let released = session.release_lease(lease).await;
        match (result, released) {
            (Ok(batch), Ok(_)) => {
                tracing::debug!(lease = %key, "Write lease released");
                Ok(batch)
            }
            (Ok(batch), Err(release_err)) => {
                // The batch is durable; the lease lapses at its ttl.
                tracing::warn!(
                    lease = %key,
                    error = %release_err,
                    "Failed to release write lease after committed persist"
                );
                Ok(batch)
            }
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(release_err)) => {
                tracing::warn!(
                    lease = %key,
                    error = %release_err,
                    "Failed to release write lease after persist error"
                );
                Err(e)
            }
        }
    }

    async fn write_entries(
        &self,
        session: &dyn CoordinationSession,
        location: &Location,
    ) -> LexiconResult<Vec<IndexEntry>> {
        tracing::info!(
            namespace = %self.namespace,
            location = %location,
            values = self.pending.len(),
            "Writing cache data"
        );

        let mut sink = self.store.open_for_write(location).await?;
        let mut batch = Vec::with_capacity(self.pending.len());

        for value in &self.pending {
            let code = match self.counter.next_value(session).await {
                Ok(code) => code,
                Err(e) => {
                    sink.abort();
                    return Err(e);
                }
            };
            tracing::debug!(code = %code, value = %value, "Appending cache record");

            let entry = IndexEntry::new(code, value.clone());
            if let Err(e) = sink.append(entry.clone()) {
                sink.abort();
                return Err(e);
            }
            batch.push(entry);
        }

        sink.finish().await?;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexicon_coord::InMemoryCoordinationService;
    use lexicon_core::{ConfigError, CoordinationError, LexiconError};
    use lexicon_storage::MemorySortedStore;
    use std::path::PathBuf;

    struct Harness {
        store: MemorySortedStore,
        coordination: InMemoryCoordinationService,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: MemorySortedStore::new(),
                coordination: InMemoryCoordinationService::new(),
            }
        }

        fn config() -> LexiconConfig {
            let mut config = LexiconConfig::with_output_path("/jobs/out/cache");
            config.storage.cache_paths = vec![PathBuf::from("/jobs/up/cache")];
            config.coordination.connect_string = Some("memory://test".to_string());
            config.coordination.max_backoff_ms = 0;
            config
        }

        fn cache(&self, config: LexiconConfig) -> SortedIndexCache {
            let resolver = ConfiguredPathResolver::from_config(&config.storage);
            SortedIndexCache::new(
                Namespace::new("country").expect("valid namespace"),
                config,
                Arc::new(self.store.clone()),
                Arc::new(resolver),
                Arc::new(self.coordination.clone()),
            )
        }
    }

    #[tokio::test]
    async fn test_unloaded_cache_is_empty() {
        let harness = Harness::new();
        let cache = harness.cache(Harness::config());

        assert!(!cache.is_loaded());
        assert_eq!(cache.get_index_for_value("apple"), Code::NOT_FOUND);
        assert_eq!(cache.get_item(Code::new(0)), None);
        assert!(cache.universe().is_empty());
    }

    #[tokio::test]
    async fn test_add_values_sorts_and_deduplicates() {
        let harness = Harness::new();
        let mut cache = harness.cache(Harness::config());

        cache.add_values(["zebra", "apple", "mango", "apple"]);
        cache.add_value("Apple");
        assert_eq!(
            cache.pending().collect::<Vec<_>>(),
            vec!["Apple", "apple", "mango", "zebra"]
        );
        assert_eq!(cache.pending_len(), 4);
    }

    #[tokio::test]
    async fn test_persist_assigns_codes_in_value_order() {
        let harness = Harness::new();
        harness
            .coordination
            .set_counter(lexicon_core::DEFAULT_COUNTER_PATH, 40)
            .await;
        let mut cache = harness.cache(Harness::config());

        cache.add_values(["zebra", "apple", "mango"]);
        let batch = cache.persist().await.expect("persist should succeed");

        assert_eq!(
            batch,
            vec![
                IndexEntry::new(40, "apple"),
                IndexEntry::new(41, "mango"),
                IndexEntry::new(42, "zebra"),
            ]
        );
        assert_eq!(cache.pending_len(), 0);

        let written = harness
            .store
            .scan(&Location::new("/jobs/out/cache/country"))
            .await
            .expect("scan should succeed");
        assert_eq!(written, batch);
    }

    #[tokio::test]
    async fn test_persist_is_not_visible_until_reload() {
        let harness = Harness::new();
        let mut cache = harness.cache(Harness::config());
        cache.load_from_storage().await.expect("load should succeed");

        cache.add_value("apple");
        cache.persist().await.expect("persist should succeed");
        assert_eq!(cache.get_index_for_value("apple"), Code::NOT_FOUND);

        cache.load_from_storage().await.expect("reload should succeed");
        assert_eq!(cache.get_index_for_value("apple"), Code::new(0));
        assert_eq!(cache.get_item(Code::new(0)), Some("apple"));
    }

    #[tokio::test]
    async fn test_second_persist_keeps_first_batch() {
        let harness = Harness::new();
        let mut cache = harness.cache(Harness::config());
        cache.add_value("apple");
        cache.persist().await.expect("persist should succeed");

        cache.load_from_storage().await.expect("load should succeed");
        cache.add_values(["apple", "mango"]);
        assert_eq!(cache.discard_known(), 1);
        cache.persist().await.expect("persist should succeed");

        cache.load_from_storage().await.expect("reload should succeed");
        assert_eq!(cache.get_index_for_value("apple"), Code::new(0));
        assert_eq!(cache.get_index_for_value("mango"), Code::new(1));
    }

    #[tokio::test]
    async fn test_empty_persist_does_no_io() {
        let harness = Harness::new();
        let mut cache = harness.cache(Harness::config());
        cache.add_value("apple");
        cache.persist().await.expect("persist should succeed");

        // An unreachable service is never contacted.
        harness.coordination.set_available(false);
        harness.store.set_available(false);
        let batch = cache.persist().await.expect("empty persist should succeed");
        assert!(batch.is_empty());

        harness.store.set_available(true);
        cache.load_from_storage().await.expect("load should succeed");
        assert_eq!(cache.get_index_for_value("apple"), Code::new(0));
    }

    #[tokio::test]
    async fn test_missing_connect_string_fails_before_io() {
        let harness = Harness::new();
        let mut config = Harness::config();
        config.coordination.connect_string = None;
        let mut cache = harness.cache(config);
        cache.add_value("apple");

        let err = cache.persist().await.expect_err("persist should fail");
        assert!(matches!(
            err,
            LexiconError::Config(ConfigError::MissingRequired { .. })
        ));
        assert_eq!(cache.pending_len(), 1);
        assert_eq!(harness.store.location_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_pending_and_releases_lease() {
        let harness = Harness::new();
        let mut cache = harness.cache(Harness::config());
        cache.add_values(["a", "b"]);

        harness.store.set_available(false);
        let err = cache.persist().await.expect_err("persist should fail");
        assert!(err.is_storage_unavailable());
        assert_eq!(cache.pending_len(), 2);
        assert_eq!(
            harness
                .coordination
                .lease_holder("/lexicon/write-lease/country")
                .await,
            None
        );

        harness.store.set_available(true);
        let batch = cache.persist().await.expect("retry should succeed");
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_lease_held_blocks_second_writer() {
        let harness = Harness::new();
        let mut session = harness
            .coordination
            .connect("memory://test")
            .await
            .expect("connect should succeed");
        session.start().await.expect("start should succeed");
        let _lease = session
            .try_acquire_lease(
                "/lexicon/write-lease/country",
                new_holder_id(),
                std::time::Duration::from_secs(60),
            )
            .await
            .expect("acquire should succeed");

        let mut cache = harness.cache(Harness::config());
        cache.add_value("apple");
        let err = cache.persist().await.expect_err("persist should fail");
        assert!(matches!(
            err,
            LexiconError::Coordination(CoordinationError::LeaseHeld { .. })
        ));
        // No code was minted.
        assert_eq!(
            harness
                .coordination
                .counter_value(lexicon_core::DEFAULT_COUNTER_PATH)
                .await,
            0
        );
    }

    #[tokio::test]
    async fn test_lease_disabled_skips_lease() {
        let harness = Harness::new();
        let mut config = Harness::config();
        config.write_lease.enabled = false;
        let mut cache = harness.cache(config);

        let mut session = harness
            .coordination
            .connect("memory://test")
            .await
            .expect("connect should succeed");
        session.start().await.expect("start should succeed");
        let _lease = session
            .try_acquire_lease(
                "/lexicon/write-lease/country",
                new_holder_id(),
                std::time::Duration::from_secs(60),
            )
            .await
            .expect("acquire should succeed");

        cache.add_value("apple");
        assert!(cache.persist().await.is_ok());
    }

    #[tokio::test]
    async fn test_discard_known() {
        let harness = Harness::new();
        harness
            .store
            .seed(
                &Location::new("/jobs/up/cache/country"),
                vec![IndexEntry::new(7, "apple")],
            )
            .expect("seed should succeed");
        let mut cache = harness.cache(Harness::config());

        cache.add_values(["apple", "mango"]);
        assert_eq!(cache.discard_known(), 0, "nothing loaded yet");

        cache.load_from_storage().await.expect("load should succeed");
        assert_eq!(cache.discard_known(), 1);
        assert_eq!(cache.pending().collect::<Vec<_>>(), vec!["mango"]);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_universe() {
        let harness = Harness::new();
        harness
            .store
            .seed(
                &Location::new("/jobs/up/cache/country"),
                vec![IndexEntry::new(1, "one")],
            )
            .expect("seed should succeed");
        let mut cache = harness.cache(Harness::config());
        cache.load_from_storage().await.expect("load should succeed");

        harness
            .store
            .seed(
                &Location::new("/jobs/out/cache/country"),
                vec![IndexEntry::new(1, "uno")],
            )
            .expect("seed should succeed");
        let err = cache
            .load_from_storage()
            .await
            .expect_err("collision should fail the load");
        assert!(err.is_collision());
        assert_eq!(cache.get_item(Code::new(1)), Some("one"));
    }
}
