//! LMDB-backed sorted store.
//!
//! Uses the heed crate (Rust bindings for LMDB). Each location is its own
//! LMDB environment directory holding a `records` database in write order and
//! a `meta` database with the format header and record count; see
//! [`crate::format`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions:
//! - Reads run in a read transaction and never block the single writer
//! - A sink buffers its records and appends them in one write transaction,
//!   so a reader sees either the previous contents or those plus the whole pass

use async_trait::async_trait;
use heed::types::Bytes;
use heed::Database;
use lexicon_core::{IndexEntry, LexiconError, LexiconResult, StorageError};

use crate::format::{
    self, COUNT_KEY, FORMAT_VERSION, MAGIC, MAGIC_KEY, META_DB, RECORDS_DB, VERSION_KEY,
};
use crate::lmdb_env::{has_data_file, open_env};
use crate::{Location, OrderedBuffer, RecordVisitor, SortedSink, SortedStore};

const MAX_DBS: u32 = 2;

fn unavailable(location: &Location, reason: impl ToString) -> LexiconError {
    StorageError::Unavailable {
        location: location.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Sorted store keeping one LMDB environment per location.
///
/// # Example
///
/// ```ignore
/// use lexicon_storage::{LmdbSortedStore, Location, SortedStore};
///
/// let store = LmdbSortedStore::new(64);
/// let universe = store
///     .open_for_read(&[Location::new("/data/job-a/cache/country")])
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct LmdbSortedStore {
    map_size_mb: usize,
}

impl LmdbSortedStore {
    /// # Arguments
    ///
    /// * `map_size_mb` - Maximum size of each location's environment
    pub fn new(map_size_mb: usize) -> Self {
        Self { map_size_mb }
    }

    fn read_records(&self, location: &Location, visit: &mut RecordVisitor<'_>) -> LexiconResult<()> {
        let path = location.path();
        if !path.is_dir() {
            return Err(unavailable(location, "location does not exist"));
        }
        if !has_data_file(path) {
            // Bootstrapped but never written.
            return Ok(());
        }

        let label = location.to_string();
        let env = open_env(path, self.map_size_mb, MAX_DBS).map_err(|e| unavailable(location, e))?;
        let rtxn = env.read_txn().map_err(|e| unavailable(location, e))?;

        let meta: Option<Database<Bytes, Bytes>> = env
            .open_database(&rtxn, Some(META_DB))
            .map_err(|e| unavailable(location, e))?;
        let records: Option<Database<Bytes, Bytes>> = env
            .open_database(&rtxn, Some(RECORDS_DB))
            .map_err(|e| unavailable(location, e))?;

        let (meta, records) = match (meta, records) {
            (None, None) => return Ok(()),
            (Some(meta), Some(records)) => (meta, records),
            _ => return Err(format::corrupt(&label, "records and meta databases out of sync")),
        };

        let magic = meta
            .get(&rtxn, MAGIC_KEY)
            .map_err(|e| unavailable(location, e))?
            .ok_or_else(|| format::corrupt(&label, "missing magic"))?;
        let version = meta
            .get(&rtxn, VERSION_KEY)
            .map_err(|e| unavailable(location, e))?
            .ok_or_else(|| format::corrupt(&label, "missing version"))?;
        let version = format::decode_u32(version, "version", &label)?;
        format::verify_header(magic, version, &label)?;

        let expected = meta
            .get(&rtxn, COUNT_KEY)
            .map_err(|e| unavailable(location, e))?
            .ok_or_else(|| format::corrupt(&label, "missing record count"))?;
        let expected = format::decode_u64(expected, "count", &label)?;

        let mut seen = 0u64;
        let iter = records.iter(&rtxn).map_err(|e| unavailable(location, e))?;
        for result in iter {
            let (_, bytes) = result.map_err(|e| unavailable(location, e))?;
            visit(format::decode_record(bytes, &label)?)?;
            seen += 1;
        }

        if seen != expected {
            return Err(format::corrupt(
                &label,
                format!("expected {} records, found {}", expected, seen),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SortedStore for LmdbSortedStore {
    async fn exists(&self, location: &Location) -> LexiconResult<bool> {
        Ok(location.path().is_dir())
    }

    async fn create(&self, location: &Location) -> LexiconResult<()> {
        std::fs::create_dir_all(location.path()).map_err(|e| unavailable(location, e))
    }

    async fn for_each_record(
        &self,
        location: &Location,
        visit: &mut RecordVisitor<'_>,
    ) -> LexiconResult<()> {
        self.read_records(location, visit)
    }

    async fn open_for_write(&self, location: &Location) -> LexiconResult<Box<dyn SortedSink>> {
        std::fs::create_dir_all(location.path()).map_err(|e| unavailable(location, e))?;
        Ok(Box::new(LmdbSink {
            location: location.clone(),
            map_size_mb: self.map_size_mb,
            buffer: OrderedBuffer::default(),
        }))
    }
}

/// Write pass committed in a single LMDB write transaction.
struct LmdbSink {
    location: Location,
    map_size_mb: usize,
    buffer: OrderedBuffer,
}

impl LmdbSink {
    fn commit(location: &Location, map_size_mb: usize, entries: &[IndexEntry]) -> LexiconResult<()> {
        let env = open_env(location.path(), map_size_mb, MAX_DBS)
            .map_err(|e| unavailable(location, e))?;
        let mut wtxn = env.write_txn().map_err(|e| unavailable(location, e))?;

        let records: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(RECORDS_DB))
            .map_err(|e| unavailable(location, e))?;
        let meta: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(META_DB))
            .map_err(|e| unavailable(location, e))?;

        let label = location.to_string();
        let existing = match meta
            .get(&wtxn, MAGIC_KEY)
            .map_err(|e| unavailable(location, e))?
        {
            None => 0,
            Some(magic) => {
                let version = meta
                    .get(&wtxn, VERSION_KEY)
                    .map_err(|e| unavailable(location, e))?
                    .ok_or_else(|| format::corrupt(&label, "missing version"))?;
                let version = format::decode_u32(version, "version", &label)?;
                format::verify_header(magic, version, &label)?;
                let count = meta
                    .get(&wtxn, COUNT_KEY)
                    .map_err(|e| unavailable(location, e))?
                    .ok_or_else(|| format::corrupt(&label, "missing record count"))?;
                format::decode_u64(count, "count", &label)?
            }
        };

        // New records continue the sequence after everything already stored.
        for (offset, entry) in entries.iter().enumerate() {
            records
                .put(
                    &mut wtxn,
                    &format::encode_sequence(existing + offset as u64),
                    &format::encode_record(entry),
                )
                .map_err(|e| unavailable(location, e))?;
        }

        let total = existing + entries.len() as u64;
        meta.put(&mut wtxn, MAGIC_KEY, &MAGIC)
            .map_err(|e| unavailable(location, e))?;
        meta.put(&mut wtxn, VERSION_KEY, &FORMAT_VERSION.to_be_bytes())
            .map_err(|e| unavailable(location, e))?;
        meta.put(&mut wtxn, COUNT_KEY, &total.to_be_bytes())
            .map_err(|e| unavailable(location, e))?;

        wtxn.commit().map_err(|e| unavailable(location, e))
    }
}

#[async_trait]
impl SortedSink for LmdbSink {
    fn append(&mut self, entry: IndexEntry) -> LexiconResult<()> {
        self.buffer.push(entry)
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    async fn finish(self: Box<Self>) -> LexiconResult<()> {
        let LmdbSink {
            location,
            map_size_mb,
            buffer,
        } = *self;
        let entries = buffer.into_entries();
        Self::commit(&location, map_size_mb, &entries)?;
        tracing::debug!(location = %location, records = entries.len(), "Committed cache write pass");
        Ok(())
    }
}
