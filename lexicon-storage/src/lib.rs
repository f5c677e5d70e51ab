//! Lexicon Storage - Sorted Persistent Store
//!
//! Durable, ordered `code → value` records at filesystem-like locations.
//! Many readers may merge several locations at once; each location has at
//! most one writer at a time, and that exclusion is the caller's job (see
//! the write lease in `lexicon-coord`).

pub mod format;
pub mod lmdb;
pub mod lmdb_env;
pub mod memory;
pub mod resolver;

pub use lmdb::LmdbSortedStore;
pub use memory::MemorySortedStore;
pub use resolver::{ConfiguredPathResolver, PathResolver, JOB_CACHE_DIR};

use async_trait::async_trait;
use lexicon_core::{
    CacheUniverse, CacheUniverseBuilder, IndexEntry, LexiconResult, Namespace, StorageError,
};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// LOCATION
// ============================================================================

/// A storage location: one cache root joined with one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location(PathBuf);

impl Location {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Location(path.into())
    }

    /// `<root>/<namespace>`
    pub fn for_namespace(root: impl AsRef<Path>, namespace: &Namespace) -> Self {
        Location(root.as_ref().join(namespace.as_relative_path()))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for Location {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

// ============================================================================
// STORE TRAITS
// ============================================================================

/// Callback receiving records in on-disk order.
///
/// A location written by several passes holds one value-ordered run per pass.
pub type RecordVisitor<'a> = dyn FnMut(IndexEntry) -> LexiconResult<()> + Send + 'a;

/// Ordered `code → value` storage.
#[async_trait]
pub trait SortedStore: Send + Sync {
    /// Whether anything (even an empty bootstrap) exists at `location`.
    async fn exists(&self, location: &Location) -> LexiconResult<bool>;

    /// Create an empty, readable location. Idempotent.
    async fn create(&self, location: &Location) -> LexiconResult<()>;

    /// Stream every record at `location` in on-disk order.
    ///
    /// Stops at the first error returned by `visit`.
    async fn for_each_record(
        &self,
        location: &Location,
        visit: &mut RecordVisitor<'_>,
    ) -> LexiconResult<()>;

    /// A write target at `location`, valid for one write pass.
    ///
    /// Values must be appended in strictly increasing order within the pass.
    /// Nothing becomes visible until [`SortedSink::finish`], which adds the
    /// pass after whatever the location already holds.
    async fn open_for_write(&self, location: &Location) -> LexiconResult<Box<dyn SortedSink>>;

    /// Collect the records at one location.
    async fn scan(&self, location: &Location) -> LexiconResult<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        self.for_each_record(location, &mut |entry| {
            entries.push(entry);
            Ok(())
        })
        .await?;
        Ok(entries)
    }

    /// Merge every location into one universe.
    ///
    /// Missing locations are created empty. Fails with `IndexCollision` on
    /// the first record whose code already maps to a different value.
    async fn open_for_read(&self, locations: &[Location]) -> LexiconResult<CacheUniverse> {
        let mut builder = CacheUniverseBuilder::new();

        for location in locations {
            if !self.exists(location).await? {
                tracing::debug!(location = %location, "Bootstrapping empty cache location");
                self.create(location).await?;
                continue;
            }

            let label = location.to_string();
            self.for_each_record(location, &mut |entry| {
                builder.insert(entry, &label).inspect_err(|e| {
                    tracing::error!(error = %e, "Index collision while loading cache");
                })
            })
            .await?;
        }

        Ok(builder.build())
    }
}

/// One write pass over a location.
#[async_trait]
pub trait SortedSink: Send {
    /// Buffer one record; its value must sort after the previous one.
    fn append(&mut self, entry: IndexEntry) -> LexiconResult<()>;

    /// Number of records appended so far.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Durably add the appended records after the location's existing ones.
    async fn finish(self: Box<Self>) -> LexiconResult<()>;

    /// Discard the pass without touching the location.
    fn abort(self: Box<Self>) {}
}

/// Append buffer shared by the sink implementations.
#[derive(Debug, Default)]
pub(crate) struct OrderedBuffer {
    entries: Vec<IndexEntry>,
}

impl OrderedBuffer {
    pub(crate) fn push(&mut self, entry: IndexEntry) -> LexiconResult<()> {
        if let Some(last) = self.entries.last() {
            if entry.value <= last.value {
                return Err(StorageError::OutOfOrder {
                    previous: last.value.clone(),
                    value: entry.value,
                }
                .into());
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn into_entries(self) -> Vec<IndexEntry> {
        self.entries
    }
}
