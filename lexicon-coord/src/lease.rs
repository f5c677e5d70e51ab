//! Write lease typestate for the single-writer contract.
//!
//! A lease can only be released while it is held, and releasing consumes it.
//!
//! # State Transition Diagram
//!
//! ```text
//! (free) ─── try_acquire_lease() ──→ Held ─── release_lease() ──→ Released
//!                                      │
//!                               expires (ttl) → another holder may take it
//! ```

use chrono::{DateTime, Utc};
use lexicon_core::{HolderId, Namespace, Timestamp};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;

// ============================================================================
// LEASE DATA (persisted, state-independent)
// ============================================================================

/// What a coordination backend stores for one lease key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseData {
    pub key: String,
    pub holder: HolderId,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}

impl LeaseData {
    /// A ttl past the representable range never expires.
    pub fn new(key: impl Into<String>, holder: HolderId, now: Timestamp, ttl: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key: key.into(),
            holder,
            acquired_at: now,
            expires_at,
        }
    }

    /// Check if the lease has expired based on current time.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Calculate remaining duration until expiry.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }

    /// Whether `holder` may take this key at `now`.
    pub fn is_available_to(&self, holder: HolderId, now: Timestamp) -> bool {
        self.holder == holder || self.is_expired(now)
    }
}

/// Lease key guarding one namespace's write location.
pub fn lease_key(prefix: &str, namespace: &Namespace) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), namespace.as_str())
}

// ============================================================================
// TYPESTATE MARKERS
// ============================================================================

/// Marker trait for lease states.
pub trait LeaseState: private::Sealed + Send + Sync {}

/// Lease is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Held;
impl LeaseState for Held {}

/// Lease has been given back to the coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released;
impl LeaseState for Released {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Held {}
    impl Sealed for super::Released {}
}

// ============================================================================
// LEASE TYPESTATE WRAPPER
// ============================================================================

/// A lease with compile-time state tracking.
#[derive(Debug)]
pub struct Lease<S: LeaseState> {
    data: LeaseData,
    _state: PhantomData<S>,
}

impl<S: LeaseState> Lease<S> {
    pub fn data(&self) -> &LeaseData {
        &self.data
    }

    pub fn key(&self) -> &str {
        &self.data.key
    }

    pub fn holder(&self) -> HolderId {
        self.data.holder
    }

    pub fn expires_at(&self) -> Timestamp {
        self.data.expires_at
    }
}

impl Lease<Held> {
    /// Only coordination backends call this, after recording the lease.
    pub fn new(data: LeaseData) -> Self {
        Lease {
            data,
            _state: PhantomData,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.data.is_expired(now)
    }

    /// Transition to `Released`. Backends call this once the record is
    /// cleared.
    pub fn release(self) -> Lease<Released> {
        Lease {
            data: self.data,
            _state: PhantomData,
        }
    }
}
