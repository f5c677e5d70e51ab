//! Identity types for lexicon entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::ValidationError;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of a lease holder (one per persisting cache instance).
pub type HolderId = Uuid;

/// Generate a new UUIDv7 holder id (timestamp-sortable).
pub fn new_holder_id() -> HolderId {
    Uuid::now_v7()
}

// ============================================================================
// CODE
// ============================================================================

/// Compact integer code assigned to a string value.
///
/// Codes are drawn from one global counter shared by every namespace, so they
/// are unique across namespaces but not densely packed within one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Code(i32);

impl Code {
    /// In-band "not found" marker returned by value lookups.
    ///
    /// The counter starts at zero and only grows, so it never mints this code.
    pub const NOT_FOUND: Code = Code(i32::MIN);

    pub const fn new(raw: i32) -> Self {
        Code(raw)
    }

    pub const fn get(self) -> i32 {
        self.0
    }

    pub fn is_sentinel(self) -> bool {
        self == Self::NOT_FOUND
    }

    /// Big-endian encoding used by the on-disk record format.
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Code(i32::from_be_bytes(bytes))
    }
}

impl From<i32> for Code {
    fn from(raw: i32) -> Self {
        Code(raw)
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> Self {
        code.0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// NAMESPACE
// ============================================================================

/// Logical identity of one cache, stored as a relative sub-folder path.
///
/// A leading `/` is accepted and dropped, so `"/country"` and `"country"`
/// name the same cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl AsRef<str>) -> Result<Self, ValidationError> {
        let raw = name.as_ref();
        let trimmed = raw.trim_start_matches('/');

        if trimmed.is_empty() {
            return Err(ValidationError::InvalidNamespace {
                namespace: raw.to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if trimmed.contains('\\') {
            return Err(ValidationError::InvalidNamespace {
                namespace: raw.to_string(),
                reason: "must use '/' as separator".to_string(),
            });
        }
        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(ValidationError::InvalidNamespace {
                    namespace: raw.to_string(),
                    reason: format!("invalid path segment '{}'", segment),
                });
            }
        }

        Ok(Namespace(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative path of this namespace below a cache root.
    pub fn as_relative_path(&self) -> PathBuf {
        self.0.split('/').collect()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl FromStr for Namespace {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Namespace {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

// ============================================================================
// INDEX ENTRY
// ============================================================================

/// One assigned mapping from code to value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    pub code: Code,
    pub value: String,
}

impl IndexEntry {
    pub fn new(code: impl Into<Code>, value: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.code, self.value)
    }
}
