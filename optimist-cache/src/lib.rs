//! Optimist Cache - Optimistic Mutations over a Keyed Cache
//!
//! Consumers read collections from a [`CacheStore`] and subscribe to their
//! changes. Writes go through the [`MutationCoordinator`], which shows the
//! new record immediately, settles it against the server through a
//! [`Writer`], rolls back on failure and finally reconciles the collection
//! from the [`Fetcher`]. The [`SuppressionGate`] keeps background fetches from
//! the [`QueryClient`] from overwriting a pending optimistic value.
//!
//! # Example
//!
//! ```ignore
//! let cache = OptimisticCache::new(server.clone(), server, CacheConfig::default());
//! let key = CacheKey::new("products");
//!
//! let _sub = cache.subscribe(&key, |products| render(products));
//! cache.fetch(&key).await?;
//!
//! let pending = cache.mutate(&key, Product::named("Lamp")).await?;
//! // The tentative product is already in `cache.get(&key).value`.
//! let report = pending.settled().await?;
//! ```

pub mod coordinator;
pub mod gate;
pub mod mock;
pub mod query;
pub mod store;
pub mod traits;

pub use coordinator::{MutationCoordinator, MutationReport, PendingMutation, Settlement};
pub use gate::{FetchTicket, SuppressionGate};
pub use mock::InMemoryProducts;
pub use query::{FetchOutcome, QueryClient};
pub use store::{CacheEntry, CacheStore, Subscription};
pub use traits::{Fetcher, Writer};

use std::sync::Arc;

use optimist_core::{CacheConfig, CacheKey, CachedItem, ConflictError, TransportError};

/// One store, one gate, and the query client and coordinator wired to them.
pub struct OptimisticCache<T, F, W>
where
    T: CachedItem,
{
    store: CacheStore<T>,
    gate: Arc<SuppressionGate>,
    queries: QueryClient<T, F>,
    coordinator: MutationCoordinator<T, F, W>,
    config: CacheConfig,
}

impl<T, F, W> Clone for OptimisticCache<T, F, W>
where
    T: CachedItem,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gate: Arc::clone(&self.gate),
            queries: self.queries.clone(),
            coordinator: self.coordinator.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T, F, W> OptimisticCache<T, F, W>
where
    T: CachedItem,
    F: Fetcher<T> + 'static,
    W: Writer<T> + 'static,
{
    pub fn new(fetcher: Arc<F>, writer: Arc<W>, config: CacheConfig) -> Self {
        let store = CacheStore::new(config.discard_unsubscribed);
        let gate = Arc::new(SuppressionGate::new());
        let queries = QueryClient::new(store.clone(), Arc::clone(&gate), Arc::clone(&fetcher));
        let coordinator = MutationCoordinator::new(
            store.clone(),
            Arc::clone(&gate),
            fetcher,
            writer,
            config.conflict_policy,
        );
        Self {
            store,
            gate,
            queries,
            coordinator,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore<T> {
        &self.store
    }

    pub fn gate(&self) -> &SuppressionGate {
        &self.gate
    }

    pub fn queries(&self) -> &QueryClient<T, F> {
        &self.queries
    }

    pub fn coordinator(&self) -> &MutationCoordinator<T, F, W> {
        &self.coordinator
    }

    pub fn get(&self, key: &CacheKey) -> CacheEntry<T> {
        self.store.get(key)
    }

    pub fn subscribe<L>(&self, key: &CacheKey, on_change: L) -> Subscription<T>
    where
        L: Fn(&[T]) + Send + Sync + 'static,
    {
        self.store.subscribe(key, on_change)
    }

    pub async fn fetch(&self, key: &CacheKey) -> Result<FetchOutcome, TransportError> {
        self.queries.fetch(key).await
    }

    pub async fn ensure(&self, key: &CacheKey) -> Result<FetchOutcome, TransportError> {
        self.queries.ensure(key).await
    }

    pub async fn invalidate(&self, key: &CacheKey) -> Result<FetchOutcome, TransportError> {
        self.queries.invalidate(key).await
    }

    pub async fn mutate(
        &self,
        key: &CacheKey,
        item: T,
    ) -> Result<PendingMutation<T>, ConflictError> {
        self.coordinator.mutate(key, item).await
    }

    pub fn is_mutating(&self, key: &CacheKey) -> bool {
        self.coordinator.is_mutating(key)
    }
}
