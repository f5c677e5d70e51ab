//! Configuration types
//!
//! Loaded from TOML. Only `storage.output_path` is required up front;
//! `coordination.connect_string` may be absent until a persist needs it.

use crate::{ConfigError, LexiconResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global counter path shared by every namespace.
pub const DEFAULT_COUNTER_PATH: &str = "/lexicon/code-counter";

/// Prefix for per-namespace write lease keys.
pub const DEFAULT_LEASE_KEY_PREFIX: &str = "/lexicon/write-lease";

pub const ENV_CONNECT_STRING: &str = "LEXICON_COORDINATION_CONNECT_STRING";
pub const ENV_OUTPUT_PATH: &str = "LEXICON_STORAGE_OUTPUT_PATH";
pub const ENV_CACHE_PATHS: &str = "LEXICON_STORAGE_CACHE_PATHS";

/// Where cache locations live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Upstream cache roots, read in order before the output root.
    #[serde(default)]
    pub cache_paths: Vec<PathBuf>,
    /// Cache root this job writes to (and also reads).
    pub output_path: PathBuf,
    /// LMDB map size per location.
    #[serde(default = "default_map_size_mb")]
    pub map_size_mb: usize,
}

fn default_map_size_mb() -> usize {
    64
}

/// Coordination service settings and counter retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CoordinationConfig {
    /// e.g. `lmdb:///var/lib/lexicon/coord` or `memory://tests`
    pub connect_string: Option<String>,
    pub counter_path: String,
    /// Compare-and-swap attempts per code before giving up.
    pub max_attempts: u32,
    /// Wall-clock bound for minting a single code.
    pub deadline_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            connect_string: None,
            counter_path: DEFAULT_COUNTER_PATH.to_string(),
            max_attempts: 10_000,
            deadline_ms: 30_000,
            initial_backoff_ms: 0,
            max_backoff_ms: 50,
        }
    }
}

impl CoordinationConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Mutual exclusion around a namespace's write path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WriteLeaseConfig {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub key_prefix: String,
}

impl Default for WriteLeaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 600_000,
            key_prefix: DEFAULT_LEASE_KEY_PREFIX.to_string(),
        }
    }
}

impl WriteLeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LexiconConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    #[serde(default)]
    pub write_lease: WriteLeaseConfig,
}

impl LexiconConfig {
    /// Configuration with defaults for everything but the output root.
    pub fn with_output_path(output_path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                cache_paths: Vec::new(),
                output_path: output_path.into(),
                map_size_mb: default_map_size_mb(),
            },
            coordination: CoordinationConfig::default(),
            write_lease: WriteLeaseConfig::default(),
        }
    }

    pub fn from_toml_str(source: &str) -> LexiconResult<Self> {
        let config: LexiconConfig = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, apply environment overrides, then validate.
    pub fn load_from_path(path: &Path) -> LexiconResult<Self> {
        Self::load_from_path_with(path, |key| std::env::var(key).ok())
    }

    /// Read, apply overrides from `lookup`, then validate.
    pub fn load_from_path_with<F>(path: &Path, lookup: F) -> LexiconResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let config: LexiconConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        let config = config.with_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    ///
    /// Environment variables:
    /// - `LEXICON_COORDINATION_CONNECT_STRING`: coordination service
    /// - `LEXICON_STORAGE_OUTPUT_PATH`: write root
    /// - `LEXICON_STORAGE_CACHE_PATHS`: comma-separated upstream read roots
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(connect_string) = lookup(ENV_CONNECT_STRING).filter(|s| !s.trim().is_empty()) {
            self.coordination.connect_string = Some(connect_string);
        }
        if let Some(output) = lookup(ENV_OUTPUT_PATH).filter(|s| !s.trim().is_empty()) {
            self.storage.output_path = PathBuf::from(output);
        }
        if let Some(paths) = lookup(ENV_CACHE_PATHS) {
            self.storage.cache_paths = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        self
    }

    /// The coordination connect string, required only on the write path.
    pub fn require_connect_string(&self) -> LexiconResult<&str> {
        match self.coordination.connect_string.as_deref() {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(ConfigError::MissingRequired {
                field: "coordination.connect_string".to_string(),
            }
            .into()),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - output_path is non-empty
    /// - map_size_mb > 0
    /// - counter_path is absolute
    /// - retry bounds are positive and backoff is ordered
    /// - lease ttl > 0 when the lease is enabled
    pub fn validate(&self) -> LexiconResult<()> {
        if self.storage.output_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.output_path".to_string(),
                value: String::new(),
                reason: "output_path must not be empty".to_string(),
            }
            .into());
        }

        if self.storage.map_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.map_size_mb".to_string(),
                value: self.storage.map_size_mb.to_string(),
                reason: "map_size_mb must be greater than 0".to_string(),
            }
            .into());
        }

        if !self.coordination.counter_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "coordination.counter_path".to_string(),
                value: self.coordination.counter_path.clone(),
                reason: "counter_path must start with '/'".to_string(),
            }
            .into());
        }

        if self.coordination.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "coordination.max_attempts".to_string(),
                value: self.coordination.max_attempts.to_string(),
                reason: "max_attempts must be greater than 0".to_string(),
            }
            .into());
        }

        if self.coordination.deadline_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "coordination.deadline_ms".to_string(),
                value: self.coordination.deadline_ms.to_string(),
                reason: "deadline_ms must be greater than 0".to_string(),
            }
            .into());
        }

        if self.coordination.max_backoff_ms < self.coordination.initial_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "coordination.max_backoff_ms".to_string(),
                value: self.coordination.max_backoff_ms.to_string(),
                reason: "max_backoff_ms must be >= initial_backoff_ms".to_string(),
            }
            .into());
        }

        if self.write_lease.enabled && self.write_lease.ttl_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "write_lease.ttl_ms".to_string(),
                value: self.write_lease.ttl_ms.to_string(),
                reason: "ttl_ms must be greater than 0 when the lease is enabled".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
