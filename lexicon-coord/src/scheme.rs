//! Connect-string dispatch across coordination backends.

use async_trait::async_trait;
use lexicon_core::{CoordinationError, LexiconResult};

use crate::{
    CoordinationService, CoordinationSession, InMemoryCoordinationService, LmdbCoordinationService,
    LMDB_SCHEME, MEMORY_SCHEME,
};

/// Routes `connect` by scheme: `memory://<name>` or `lmdb://<dir>`.
///
/// By default all `memory://` connect strings reach the process-wide
/// [`InMemoryCoordinationService::process_shared`], so every instance in one
/// process draws from the same counters.
#[derive(Debug, Clone)]
pub struct SchemeCoordinationService {
    memory: InMemoryCoordinationService,
    lmdb: LmdbCoordinationService,
}

impl Default for SchemeCoordinationService {
    fn default() -> Self {
        Self::new(
            InMemoryCoordinationService::process_shared(),
            LmdbCoordinationService::default(),
        )
    }
}

impl SchemeCoordinationService {
    pub fn new(memory: InMemoryCoordinationService, lmdb: LmdbCoordinationService) -> Self {
        Self { memory, lmdb }
    }

    pub fn memory(&self) -> &InMemoryCoordinationService {
        &self.memory
    }
}

#[async_trait]
impl CoordinationService for SchemeCoordinationService {
    async fn connect(&self, connect_string: &str) -> LexiconResult<Box<dyn CoordinationSession>> {
        if connect_string.starts_with(MEMORY_SCHEME) {
            self.memory.connect(connect_string).await
        } else if connect_string.starts_with(LMDB_SCHEME) {
            self.lmdb.connect(connect_string).await
        } else {
            Err(CoordinationError::Unavailable {
                connect_string: connect_string.to_string(),
                reason: format!(
                    "unsupported scheme (expected {} or {})",
                    MEMORY_SCHEME, LMDB_SCHEME
                ),
            }
            .into())
        }
    }
}
