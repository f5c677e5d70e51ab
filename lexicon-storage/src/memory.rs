//! In-memory sorted store for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use lexicon_core::{IndexEntry, LexiconError, LexiconResult, StorageError};

use crate::{Location, OrderedBuffer, RecordVisitor, SortedSink, SortedStore};

/// Mock store holding every location in a shared map.
///
/// Clones share state, so several cache instances built from clones of one
/// store see the same "filesystem".
#[derive(Debug, Clone, Default)]
pub struct MemorySortedStore {
    locations: Arc<RwLock<BTreeMap<Location, Vec<IndexEntry>>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemorySortedStore {
    /// Create a new mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write records verbatim, bypassing sink ordering checks.
    ///
    /// Lets tests build stores that a real writer would never produce.
    pub fn seed(&self, location: &Location, entries: Vec<IndexEntry>) -> LexiconResult<()> {
        self.locations
            .write()
            .map_err(poisoned)?
            .insert(location.clone(), entries);
        Ok(())
    }

    /// Make every subsequent operation fail with `StorageUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Get count of known locations (including empty bootstraps).
    pub fn location_count(&self) -> usize {
        self.locations.read().map(|l| l.len()).unwrap_or(0)
    }

    fn check_available(&self, location: &Location) -> LexiconResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                location: location.to_string(),
                reason: "store marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> LexiconError {
    StorageError::LockPoisoned.into()
}

#[async_trait]
impl SortedStore for MemorySortedStore {
    async fn exists(&self, location: &Location) -> LexiconResult<bool> {
        self.check_available(location)?;
        Ok(self.locations.read().map_err(poisoned)?.contains_key(location))
    }

    async fn create(&self, location: &Location) -> LexiconResult<()> {
        self.check_available(location)?;
        self.locations
            .write()
            .map_err(poisoned)?
            .entry(location.clone())
            .or_default();
        Ok(())
    }

    async fn for_each_record(
        &self,
        location: &Location,
        visit: &mut RecordVisitor<'_>,
    ) -> LexiconResult<()> {
        self.check_available(location)?;
        let entries = self
            .locations
            .read()
            .map_err(poisoned)?
            .get(location)
            .cloned()
            .ok_or_else(|| StorageError::Unavailable {
                location: location.to_string(),
                reason: "location does not exist".to_string(),
            })?;

        for entry in entries {
            visit(entry)?;
        }
        Ok(())
    }

    async fn open_for_write(&self, location: &Location) -> LexiconResult<Box<dyn SortedSink>> {
        self.check_available(location)?;
        Ok(Box::new(MemorySink {
            store: self.clone(),
            location: location.clone(),
            buffer: OrderedBuffer::default(),
        }))
    }
}

struct MemorySink {
    store: MemorySortedStore,
    location: Location,
    buffer: OrderedBuffer,
}

#[async_trait]
impl SortedSink for MemorySink {
    fn append(&mut self, entry: IndexEntry) -> LexiconResult<()> {
        self.buffer.push(entry)
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    async fn finish(self: Box<Self>) -> LexiconResult<()> {
        let MemorySink {
            store,
            location,
            buffer,
        } = *self;
        store.check_available(&location)?;
        store
            .locations
            .write()
            .map_err(poisoned)?
            .entry(location)
            .or_default()
            .extend(buffer.into_entries());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexicon_core::Code;

    fn loc(path: &str) -> Location {
        Location::new(path)
    }

    #[tokio::test]
    async fn test_write_and_scan() {
        let store = MemorySortedStore::new();
        let mut sink = store
            .open_for_write(&loc("/out/ns"))
            .await
            .expect("open_for_write should succeed");
        sink.append(IndexEntry::new(3, "apple"))
            .expect("append should succeed");
        sink.append(IndexEntry::new(4, "mango"))
            .expect("append should succeed");
        assert_eq!(sink.len(), 2);

        // Not visible before finish.
        assert!(!store
            .exists(&loc("/out/ns"))
            .await
            .expect("exists should succeed"));

        sink.finish().await.expect("finish should succeed");
        let entries = store
            .scan(&loc("/out/ns"))
            .await
            .expect("scan should succeed");
        assert_eq!(
            entries,
            vec![IndexEntry::new(3, "apple"), IndexEntry::new(4, "mango")]
        );
    }

    #[tokio::test]
    async fn test_second_pass_appends() {
        let store = MemorySortedStore::new();
        for (code, value) in [(0, "apple"), (1, "banana")] {
            let mut sink = store
                .open_for_write(&loc("/out/ns"))
                .await
                .expect("open_for_write should succeed");
            sink.append(IndexEntry::new(code, value))
                .expect("append should succeed");
            sink.finish().await.expect("finish should succeed");
        }

        let entries = store
            .scan(&loc("/out/ns"))
            .await
            .expect("scan should succeed");
        assert_eq!(
            entries,
            vec![IndexEntry::new(0, "apple"), IndexEntry::new(1, "banana")]
        );
    }

    #[test]
    fn test_seed_reports_poisoned_lock() {
        let store = MemorySortedStore::new();
        let locations = store.locations.clone();
        let _ = std::thread::spawn(move || {
            let _guard = locations.write().expect("lock should be healthy");
            panic!("writer died holding the lock");
        })
        .join();

        let err = store
            .seed(&loc("/a/ns"), vec![IndexEntry::new(1, "x")])
            .expect_err("seed should fail on a poisoned lock");
        assert_eq!(err, LexiconError::Storage(StorageError::LockPoisoned));
    }

    #[tokio::test]
    async fn test_collision_within_one_location() {
        let store = MemorySortedStore::new();
        store
            .seed(
                &loc("/a/ns"),
                vec![IndexEntry::new(1, "x"), IndexEntry::new(1, "y")],
            )
            .expect("seed should succeed");

        let err = store
            .open_for_read(&[loc("/a/ns")])
            .await
            .expect_err("duplicate code should collide");
        assert!(err.is_collision());
    }

    #[tokio::test]
    async fn test_collision_stops_streaming() {
        let store = MemorySortedStore::new();
        store
            .seed(&loc("/a/ns"), vec![IndexEntry::new(1, "x")])
            .expect("seed should succeed");
        store
            .seed(
                &loc("/b/ns"),
                vec![IndexEntry::new(1, "y"), IndexEntry::new(2, "never-read")],
            )
            .expect("seed should succeed");

        let mut seen = Vec::new();
        let mut builder = lexicon_core::CacheUniverseBuilder::new();
        for location in [loc("/a/ns"), loc("/b/ns")] {
            let result = store
                .for_each_record(&location, &mut |entry| {
                    seen.push(entry.code);
                    builder.insert(entry, "test")
                })
                .await;
            if result.is_err() {
                break;
            }
        }
        assert_eq!(seen, vec![Code::new(1), Code::new(1)]);
    }

    #[tokio::test]
    async fn test_read_bootstraps_missing_locations() {
        let store = MemorySortedStore::new();
        store
            .seed(&loc("/a/ns"), vec![IndexEntry::new(7, "seven")])
            .expect("seed should succeed");

        let universe = store
            .open_for_read(&[loc("/a/ns"), loc("/b/ns")])
            .await
            .expect("open_for_read should succeed");
        assert_eq!(universe.len(), 1);
        assert_eq!(store.location_count(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemorySortedStore::new();
        store.set_available(false);

        let err = store
            .open_for_read(&[loc("/a/ns")])
            .await
            .expect_err("unavailable store should fail");
        assert!(err.is_storage_unavailable());

        store.set_available(true);
        assert!(store.open_for_read(&[loc("/a/ns")]).await.is_ok());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::collection::btree_map;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn run<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime should build")
            .block_on(future)
    }

    fn entries(map: &BTreeMap<i32, String>) -> Vec<IndexEntry> {
        map.iter()
            .map(|(code, value)| IndexEntry::new(*code, value.clone()))
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: merging two locations fails exactly when some shared
        /// code carries different values, and otherwise yields their union.
        #[test]
        fn prop_merge_collides_iff_values_disagree(
            left in btree_map(0i32..40, "[a-c]{1,2}", 0..12),
            right in btree_map(0i32..40, "[a-c]{1,2}", 0..12),
        ) {
            let store = MemorySortedStore::new();
            let a = Location::new("/a/ns");
            let b = Location::new("/b/ns");
            store.seed(&a, entries(&left)).expect("seed should succeed");
            store.seed(&b, entries(&right)).expect("seed should succeed");

            let disagree = left
                .iter()
                .any(|(code, value)| right.get(code).is_some_and(|other| other != value));

            let result = run(store.open_for_read(&[a, b]));
            if disagree {
                prop_assert!(result.as_ref().is_err_and(|e| e.is_collision()));
            } else {
                let universe = result.expect("merge without disagreement should succeed");
                let mut union = left.clone();
                union.extend(right.clone());
                prop_assert_eq!(universe.len(), union.len());
                for (code, value) in &union {
                    prop_assert_eq!(universe.get(lexicon_core::Code::new(*code)), Some(value.as_str()));
                }
            }
        }
    }
}
