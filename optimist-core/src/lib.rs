//! Optimist Core - Data Types
//!
//! Pure data structures shared by the cache, the client and the test
//! utilities. This crate contains ONLY data types - no runtime, no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod config;
pub mod entities;
pub mod error;

pub use config::{CacheConfig, ConflictPolicy};
pub use entities::{CachedItem, Product, ProductId};
pub use error::{
    ConfigError, ConflictError, OptimistError, OptimistResult, StaleSuppressionError,
    TransportError, ValidationError, WriteError,
};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// CACHE KEY
// ============================================================================

/// Opaque identifier for one logical collection (e.g. `"products"`).
///
/// Keys are cheap to clone and stable for the lifetime of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ENTRY STATUS
// ============================================================================

/// Lifecycle state of a cached collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Nothing in flight for this key.
    #[default]
    Idle,
    /// A background fetch (or a post-mutation reconcile) is in flight.
    Fetching,
    /// An optimistic write is pending; the entry holds a rollback snapshot.
    Mutating,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Idle => "idle",
            EntryStatus::Fetching => "fetching",
            EntryStatus::Mutating => "mutating",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
