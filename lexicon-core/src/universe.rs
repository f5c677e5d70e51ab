//! The loaded, read-only code → value mapping.
//!
//! A [`CacheUniverse`] can only be produced by [`CacheUniverseBuilder`], which
//! checks every record as it arrives. Once built it exposes no mutating API;
//! callers share it as `Arc<CacheUniverse>` so a code they hold keeps
//! resolving to the same value for as long as they hold the view.

use std::collections::btree_map::{BTreeMap, Entry};
use std::fmt;

use crate::{Code, IndexEntry, LexiconError, LexiconResult};

/// Immutable union of every persisted location of one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheUniverse {
    entries: BTreeMap<Code, String>,
}

impl CacheUniverse {
    /// An empty universe (nothing loaded yet, or nothing persisted).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Direct lookup by code.
    pub fn get(&self, code: Code) -> Option<&str> {
        self.entries.get(&code).map(String::as_str)
    }

    /// Code assigned to `value`, or [`Code::NOT_FOUND`].
    ///
    /// Linear scan in ascending code order with an exact, case-sensitive
    /// comparison; the lowest matching code wins.
    pub fn code_for(&self, value: &str) -> Code {
        self.entries
            .iter()
            .find(|(_, v)| v.as_str() == value)
            .map(|(code, _)| *code)
            .unwrap_or(Code::NOT_FOUND)
    }

    pub fn contains_value(&self, value: &str) -> bool {
        !self.code_for(value).is_sentinel()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending code order.
    pub fn iter(&self) -> impl Iterator<Item = (Code, &str)> + '_ {
        self.entries.iter().map(|(code, value)| (*code, value.as_str()))
    }
}

impl fmt::Display for CacheUniverse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (code, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", code, value)?;
        }
        write!(f, "}}")
    }
}

/// Accumulates records from one or more locations into a [`CacheUniverse`].
#[derive(Debug, Default)]
pub struct CacheUniverseBuilder {
    entries: BTreeMap<Code, String>,
}

impl CacheUniverseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one streamed record.
    ///
    /// The same code with the same value is accepted once; the same code with
    /// a different value fails immediately with `IndexCollision`.
    pub fn insert(&mut self, entry: IndexEntry, location: &str) -> LexiconResult<()> {
        match self.entries.entry(entry.code) {
            Entry::Vacant(slot) => {
                slot.insert(entry.value);
                Ok(())
            }
            Entry::Occupied(slot) if *slot.get() == entry.value => Ok(()),
            Entry::Occupied(slot) => Err(LexiconError::IndexCollision {
                code: entry.code,
                existing: slot.get().clone(),
                incoming: entry.value,
                location: location.to_string(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> CacheUniverse {
        CacheUniverse {
            entries: self.entries,
        }
    }
}
