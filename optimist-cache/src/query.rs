//! Background queries.
//!
//! The query client performs the ordinary reads of a collection: the initial
//! load, explicit refreshes and invalidations. Every fetch takes a ticket from
//! the [`SuppressionGate`] before it launches and applies its response only if
//! the ticket is still current, checked inside the store's critical section
//! for the key.

use std::sync::Arc;

use optimist_core::{CacheKey, CachedItem, TransportError};

use crate::gate::{FetchTicket, SuppressionGate};
use crate::store::CacheStore;
use crate::traits::Fetcher;

/// What happened to one background fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The response was applied; carries the number of records.
    Applied(usize),
    /// The key was suppressed, so no fetch was started.
    Suppressed,
    /// The key was suppressed while the fetch was in flight; its response
    /// was dropped.
    Discarded,
    /// The entry was already loaded and no fetch was needed.
    Cached,
}

impl FetchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, FetchOutcome::Applied(_))
    }
}

/// Returns the ticket and decrements the in-flight count even if the fetch
/// future is dropped.
struct InFlight<'a, T: CachedItem> {
    store: &'a CacheStore<T>,
    gate: &'a SuppressionGate,
    ticket: FetchTicket,
}

impl<T: CachedItem> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        self.gate.finish_fetch(&self.ticket);
        self.store.fetch_finished(self.ticket.key());
    }
}

/// Issues gated fetches into a [`CacheStore`].
pub struct QueryClient<T, F>
where
    T: CachedItem,
{
    store: CacheStore<T>,
    gate: Arc<SuppressionGate>,
    fetcher: Arc<F>,
}

impl<T, F> Clone for QueryClient<T, F>
where
    T: CachedItem,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gate: Arc::clone(&self.gate),
            fetcher: Arc::clone(&self.fetcher),
        }
    }
}

impl<T, F> QueryClient<T, F>
where
    T: CachedItem,
    F: Fetcher<T>,
{
    pub fn new(store: CacheStore<T>, gate: Arc<SuppressionGate>, fetcher: Arc<F>) -> Self {
        Self {
            store,
            gate,
            fetcher,
        }
    }

    pub fn store(&self) -> &CacheStore<T> {
        &self.store
    }

    /// Fetch `key` and apply the response unless the key gets suppressed in
    /// the meantime.
    ///
    /// A failed fetch leaves the cached collection untouched.
    pub async fn fetch(&self, key: &CacheKey) -> Result<FetchOutcome, TransportError> {
        let Some(ticket) = self.gate.begin_fetch(key) else {
            tracing::debug!(key = %key, "Skipped fetch for suppressed key");
            return Ok(FetchOutcome::Suppressed);
        };

        self.store.fetch_started(key);
        let in_flight = InFlight {
            store: &self.store,
            gate: &self.gate,
            ticket,
        };

        let items = self.fetcher.fetch(key).await.map_err(|err| {
            tracing::warn!(key = %key, error = %err, "Fetch failed, keeping cached value");
            err
        })?;
        let len = items.len();

        match self
            .store
            .apply_if(key, items, || self.gate.check(&in_flight.ticket))
        {
            Ok(()) => Ok(FetchOutcome::Applied(len)),
            Err(stale) => {
                tracing::debug!(error = %stale, "Discarded stale fetch");
                Ok(FetchOutcome::Discarded)
            }
        }
    }

    /// Fetch only if the entry has never been loaded.
    pub async fn ensure(&self, key: &CacheKey) -> Result<FetchOutcome, TransportError> {
        if self.store.get(key).is_loaded() {
            return Ok(FetchOutcome::Cached);
        }
        self.fetch(key).await
    }

    /// Mark `key` stale and refetch it now.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<FetchOutcome, TransportError> {
        tracing::debug!(key = %key, "Invalidating query");
        self.fetch(key).await
    }

    /// Refetch every key currently held by the store.
    ///
    /// Returns the outcome per key; one failure does not stop the others.
    pub async fn invalidate_all(&self) -> Vec<(CacheKey, Result<FetchOutcome, TransportError>)> {
        let mut outcomes = Vec::new();
        for key in self.store.keys() {
            let outcome = self.invalidate(&key).await;
            outcomes.push((key, outcome));
        }
        outcomes
    }
}
