//! LMDB-backed coordination for single-host deployments.
//!
//! Connect string: `lmdb://<dir>`. Counters and leases live in two databases
//! of one environment. LMDB allows a single write transaction at a time,
//! across processes too, so doing the read and the swap inside one write
//! transaction makes `compare_and_set` atomic for every process on the host.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env};
use lexicon_core::{CoordinationError, HolderId, LexiconError, LexiconResult};
use lexicon_storage::lmdb_env::open_env;

use crate::{CoordinationService, CoordinationSession, Held, Lease, LeaseData, Released};

/// Scheme prefix accepted by [`LmdbCoordinationService`].
pub const LMDB_SCHEME: &str = "lmdb://";

const COUNTERS_DB: &str = "counters";
const LEASES_DB: &str = "leases";
const MAX_DBS: u32 = 2;

fn unavailable(connect_string: &str, reason: impl ToString) -> LexiconError {
    CoordinationError::Unavailable {
        connect_string: connect_string.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Coordination backend over a shared LMDB environment directory.
#[derive(Debug, Clone)]
pub struct LmdbCoordinationService {
    map_size_mb: usize,
}

impl Default for LmdbCoordinationService {
    fn default() -> Self {
        Self::new(16)
    }
}

impl LmdbCoordinationService {
    pub fn new(map_size_mb: usize) -> Self {
        Self { map_size_mb }
    }

    fn parse(connect_string: &str) -> LexiconResult<PathBuf> {
        let dir = connect_string
            .strip_prefix(LMDB_SCHEME)
            .ok_or_else(|| unavailable(connect_string, "expected lmdb://<dir>"))?;
        if dir.is_empty() {
            return Err(unavailable(connect_string, "empty directory"));
        }
        Ok(PathBuf::from(dir))
    }
}

#[async_trait]
impl CoordinationService for LmdbCoordinationService {
    async fn connect(&self, connect_string: &str) -> LexiconResult<Box<dyn CoordinationSession>> {
        let dir = Self::parse(connect_string)?;
        let env = open_env(&dir, self.map_size_mb, MAX_DBS)
            .map_err(|e| unavailable(connect_string, e))?;
        Ok(Box::new(LmdbSession {
            connect_string: connect_string.to_string(),
            env,
            dbs: None,
        }))
    }
}

#[derive(Clone, Copy)]
struct Databases {
    counters: Database<Bytes, Bytes>,
    leases: Database<Bytes, Bytes>,
}

struct LmdbSession {
    connect_string: String,
    env: Env,
    /// Set by `start`, cleared by `stop`.
    dbs: Option<Databases>,
}

impl LmdbSession {
    fn err(&self, reason: impl ToString) -> LexiconError {
        unavailable(&self.connect_string, reason)
    }

    fn dbs(&self) -> LexiconResult<Databases> {
        self.dbs
            .ok_or_else(|| CoordinationError::SessionNotStarted.into())
    }

    fn create_databases(&self) -> LexiconResult<Databases> {
        let mut wtxn = self.env.write_txn().map_err(|e| self.err(e))?;
        let counters = self
            .env
            .create_database(&mut wtxn, Some(COUNTERS_DB))
            .map_err(|e| self.err(e))?;
        let leases = self
            .env
            .create_database(&mut wtxn, Some(LEASES_DB))
            .map_err(|e| self.err(e))?;
        wtxn.commit().map_err(|e| self.err(e))?;
        Ok(Databases { counters, leases })
    }

    fn decode_count(&self, path: &str, bytes: Option<&[u8]>) -> LexiconResult<i32> {
        match bytes {
            None => Ok(0),
            Some(bytes) => {
                let array: [u8; 4] = bytes
                    .try_into()
                    .map_err(|_| self.err(format!("counter at {} is not 4 bytes", path)))?;
                Ok(i32::from_be_bytes(array))
            }
        }
    }

    fn read_count(&self, path: &str) -> LexiconResult<i32> {
        let dbs = self.dbs()?;
        let rtxn = self.env.read_txn().map_err(|e| self.err(e))?;
        let bytes = dbs
            .counters
            .get(&rtxn, path.as_bytes())
            .map_err(|e| self.err(e))?;
        self.decode_count(path, bytes)
    }

    fn swap_count(&self, path: &str, expected: i32, new: i32) -> LexiconResult<bool> {
        let dbs = self.dbs()?;
        let mut wtxn = self.env.write_txn().map_err(|e| self.err(e))?;
        let current = {
            let bytes = dbs
                .counters
                .get(&wtxn, path.as_bytes())
                .map_err(|e| self.err(e))?;
            self.decode_count(path, bytes)?
        };
        if current != expected {
            return Ok(false);
        }
        dbs.counters
            .put(&mut wtxn, path.as_bytes(), &new.to_be_bytes())
            .map_err(|e| self.err(e))?;
        wtxn.commit().map_err(|e| self.err(e))?;
        Ok(true)
    }

    fn decode_lease(&self, bytes: &[u8]) -> LexiconResult<LeaseData> {
        serde_json::from_slice(bytes).map_err(|e| self.err(format!("bad lease record: {}", e)))
    }

    fn acquire(&self, key: &str, holder: HolderId, ttl: Duration) -> LexiconResult<LeaseData> {
        let dbs = self.dbs()?;
        let now = Utc::now();
        let mut wtxn = self.env.write_txn().map_err(|e| self.err(e))?;

        let existing = dbs
            .leases
            .get(&wtxn, key.as_bytes())
            .map_err(|e| self.err(e))?
            .map(|bytes| self.decode_lease(bytes))
            .transpose()?;
        if let Some(existing) = existing {
            if !existing.is_available_to(holder, now) {
                return Err(CoordinationError::LeaseHeld {
                    key: key.to_string(),
                    holder: existing.holder.to_string(),
                }
                .into());
            }
        }

        let data = LeaseData::new(key, holder, now, ttl);
        let bytes = serde_json::to_vec(&data).map_err(|e| self.err(e))?;
        dbs.leases
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(|e| self.err(e))?;
        wtxn.commit().map_err(|e| self.err(e))?;
        Ok(data)
    }

    fn release(&self, data: &LeaseData) -> LexiconResult<()> {
        let dbs = self.dbs()?;
        let mut wtxn = self.env.write_txn().map_err(|e| self.err(e))?;
        let current = dbs
            .leases
            .get(&wtxn, data.key.as_bytes())
            .map_err(|e| self.err(e))?
            .map(|bytes| self.decode_lease(bytes))
            .transpose()?;
        if current.is_some_and(|l| l.holder == data.holder) {
            dbs.leases
                .delete(&mut wtxn, data.key.as_bytes())
                .map_err(|e| self.err(e))?;
        }
        wtxn.commit().map_err(|e| self.err(e))?;
        Ok(())
    }
}

#[async_trait]
impl CoordinationSession for LmdbSession {
    async fn start(&mut self) -> LexiconResult<()> {
        if self.dbs.is_none() {
            self.dbs = Some(self.create_databases()?);
        }
        Ok(())
    }

    async fn stop(&mut self) -> LexiconResult<()> {
        self.dbs = None;
        Ok(())
    }

    async fn get_count(&self, path: &str) -> LexiconResult<i32> {
        self.read_count(path)
    }

    async fn compare_and_set(&self, path: &str, expected: i32, new: i32) -> LexiconResult<bool> {
        self.swap_count(path, expected, new)
    }

    async fn try_acquire_lease(
        &self,
        key: &str,
        holder: HolderId,
        ttl: Duration,
    ) -> LexiconResult<Lease<Held>> {
        self.acquire(key, holder, ttl).map(Lease::new)
    }

    async fn release_lease(&self, lease: Lease<Held>) -> LexiconResult<Lease<Released>> {
        self.release(lease.data())?;
        Ok(lease.release())
    }
}
