//! Error types for lexicon operations

use crate::Code;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable at {location}: {reason}")]
    Unavailable { location: String, reason: String },

    #[error("Out-of-order append: '{value}' does not sort after '{previous}'")]
    OutOfOrder { previous: String, value: String },

    #[error("Corrupt store at {location}: {reason}")]
    Corrupt { location: String, reason: String },

    #[error("Invalid location {location}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Coordination service errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("Coordination service unavailable at '{connect_string}': {reason}")]
    Unavailable {
        connect_string: String,
        reason: String,
    },

    #[error("Coordination session used before start")]
    SessionNotStarted,

    #[error("Counter {path} still contended after {attempts} attempts")]
    ContentionExhausted { path: String, attempts: u32 },

    #[error("Counter {path} missed its deadline after {elapsed_ms}ms")]
    DeadlineExceeded { path: String, elapsed_ms: u64 },

    #[error("Counter {path} cannot advance past i32::MAX")]
    CounterExhausted { path: String },

    #[error("Write lease {key} is held by {holder}")]
    LeaseHeld { key: String, holder: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file: {reason}")]
    Io { reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid namespace '{namespace}': {reason}")]
    InvalidNamespace { namespace: String, reason: String },
}

/// Master error type for all lexicon errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexiconError {
    /// Two records claim the same code with different values.
    #[error("Index collision at {location}: code {code} is '{existing}', refusing '{incoming}'")]
    IndexCollision {
        code: Code,
        existing: String,
        incoming: String,
        location: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl LexiconError {
    pub fn is_collision(&self) -> bool {
        matches!(self, LexiconError::IndexCollision { .. })
    }

    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, LexiconError::Storage(StorageError::Unavailable { .. }))
    }

    pub fn is_coordination_unavailable(&self) -> bool {
        matches!(
            self,
            LexiconError::Coordination(CoordinationError::Unavailable { .. })
        )
    }
}

/// Result type alias for lexicon operations.
pub type LexiconResult<T> = Result<T, LexiconError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_display_names_both_values() {
        let err = LexiconError::IndexCollision {
            code: Code::new(12),
            existing: "apple".to_string(),
            incoming: "pear".to_string(),
            location: "/cache/fruit".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Index collision"));
        assert!(msg.contains("12"));
        assert!(msg.contains("apple"));
        assert!(msg.contains("pear"));
        assert!(err.is_collision());
    }

    #[test]
    fn test_storage_error_display_out_of_order() {
        let err = StorageError::OutOfOrder {
            previous: "mango".to_string(),
            value: "apple".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("mango"));
        assert!(msg.contains("apple"));
    }

    #[test]
    fn test_coordination_error_display_contention() {
        let err = CoordinationError::ContentionExhausted {
            path: "/lexicon/code-counter".to_string(),
            attempts: 5,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("/lexicon/code-counter"));
        assert!(msg.contains("5 attempts"));
    }

    #[test]
    fn test_lexicon_error_from_variants() {
        let storage = LexiconError::from(StorageError::Unavailable {
            location: "/nope".to_string(),
            reason: "gone".to_string(),
        });
        assert!(storage.is_storage_unavailable());

        let coordination = LexiconError::from(CoordinationError::Unavailable {
            connect_string: "memory://x".to_string(),
            reason: "down".to_string(),
        });
        assert!(coordination.is_coordination_unavailable());

        let config = LexiconError::from(ConfigError::MissingRequired {
            field: "coordination.connect_string".to_string(),
        });
        assert!(matches!(config, LexiconError::Config(_)));

        let validation = LexiconError::from(ValidationError::InvalidNamespace {
            namespace: "".to_string(),
            reason: "empty".to_string(),
        });
        assert!(matches!(validation, LexiconError::Validation(_)));
        assert!(!validation.is_collision());
    }
}
