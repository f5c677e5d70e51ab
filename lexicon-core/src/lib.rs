//! Lexicon Core - Domain Types
//!
//! Codes, namespaces, entries, the read-only cache universe, the error
//! taxonomy and configuration. All other lexicon crates depend on this.

pub mod config;
pub mod error;
pub mod identity;
pub mod universe;

pub use config::{
    CoordinationConfig, LexiconConfig, StorageConfig, WriteLeaseConfig, DEFAULT_COUNTER_PATH,
    DEFAULT_LEASE_KEY_PREFIX, ENV_CACHE_PATHS, ENV_CONNECT_STRING, ENV_OUTPUT_PATH,
};
pub use error::{
    ConfigError, CoordinationError, LexiconError, LexiconResult, StorageError, ValidationError,
};
pub use identity::{new_holder_id, Code, HolderId, IndexEntry, Namespace, Timestamp};
pub use universe::{CacheUniverse, CacheUniverseBuilder};
