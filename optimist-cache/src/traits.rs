//! Fetcher and Writer traits.
//!
//! These traits abstract over the authority that owns the cached data. The
//! cache never talks to a transport directly; it only awaits these two
//! operations.

use async_trait::async_trait;
use optimist_core::{CacheKey, CachedItem, TransportError, WriteError};

/// Reads the authoritative collection for a cache key.
///
/// Implementations must be `Send + Sync` because the cache awaits them from
/// spawned settlement tasks.
#[async_trait]
pub trait Fetcher<T: CachedItem>: Send + Sync {
    /// Fetch the current collection for `key`.
    async fn fetch(&self, key: &CacheKey) -> Result<Vec<T>, TransportError>;
}

/// Persists a new record and returns its canonical, server-assigned form.
#[async_trait]
pub trait Writer<T: CachedItem>: Send + Sync {
    /// Persist `item`.
    ///
    /// The returned record carries the server id. Once issued, a write is
    /// always awaited to completion by the cache.
    async fn write(&self, item: &T) -> Result<T, WriteError>;
}
