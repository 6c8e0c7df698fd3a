//! Optimist Test Utilities
//!
//! Shared test infrastructure for the optimist workspace:
//! - Proptest generators for products and collections
//! - Manually driven fetchers and writers for interleaving tests
//! - Fixtures for common cache setups

// Re-export the in-memory server from its source crate
pub use optimist_cache::InMemoryProducts;

// Re-export core and cache types for convenience
pub use optimist_cache::{
    CacheEntry, CacheStore, FetchOutcome, Fetcher, MutationReport, OptimisticCache,
    PendingMutation, Settlement, Subscription, SuppressionGate, Writer,
};
pub use optimist_core::{
    CacheConfig, CacheKey, CachedItem, ConflictError, ConflictPolicy, EntryStatus, Product,
    ProductId, TransportError, ValidationError, WriteError,
};

use std::marker::PhantomData;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// MANUAL FETCHER / WRITER
// ============================================================================

/// One parked `fetch` call, answered by the test.
#[derive(Debug)]
pub struct FetchCall<T> {
    pub key: CacheKey,
    reply: oneshot::Sender<Result<Vec<T>, TransportError>>,
}

impl<T> FetchCall<T> {
    /// Complete the call. Returns false if the caller stopped waiting.
    pub fn respond(self, result: Result<Vec<T>, TransportError>) -> bool {
        self.reply.send(result).is_ok()
    }

    pub fn ok(self, items: Vec<T>) -> bool {
        self.respond(Ok(items))
    }

    pub fn fail(self, err: TransportError) -> bool {
        self.respond(Err(err))
    }
}

/// One parked `write` call, answered by the test.
#[derive(Debug)]
pub struct WriteCall<T> {
    pub item: T,
    reply: oneshot::Sender<Result<T, WriteError>>,
}

impl<T> WriteCall<T> {
    pub fn respond(self, result: Result<T, WriteError>) -> bool {
        self.reply.send(result).is_ok()
    }

    pub fn ok(self, canonical: T) -> bool {
        self.respond(Ok(canonical))
    }

    pub fn fail(self, err: impl Into<WriteError>) -> bool {
        self.respond(Err(err.into()))
    }
}

/// Fetcher whose calls park until the test answers them through the paired
/// [`ManualHandle`].
#[derive(Debug)]
pub struct ManualFetcher<T> {
    calls: mpsc::UnboundedSender<FetchCall<T>>,
}

/// Writer whose calls park until the test answers them.
#[derive(Debug)]
pub struct ManualWriter<T> {
    calls: mpsc::UnboundedSender<WriteCall<T>>,
}

/// Receiving side of a manual fetcher or writer.
#[derive(Debug)]
pub struct ManualHandle<C> {
    calls: mpsc::UnboundedReceiver<C>,
}

impl<C> ManualHandle<C> {
    /// Wait for the next parked call. `None` once the fetcher or writer is
    /// dropped.
    pub async fn next(&mut self) -> Option<C> {
        self.calls.recv().await
    }

    /// A call that is already parked, if any.
    pub fn try_next(&mut self) -> Option<C> {
        self.calls.try_recv().ok()
    }
}

impl<T> ManualFetcher<T> {
    /// A fetcher and the handle that answers its calls.
    pub fn channel() -> (Self, ManualHandle<FetchCall<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { calls: tx }, ManualHandle { calls: rx })
    }
}

impl<T> ManualWriter<T> {
    pub fn channel() -> (Self, ManualHandle<WriteCall<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { calls: tx }, ManualHandle { calls: rx })
    }
}

fn abandoned() -> TransportError {
    TransportError::Unreachable {
        reason: "call abandoned by test".to_string(),
    }
}

#[async_trait]
impl<T: CachedItem> Fetcher<T> for ManualFetcher<T> {
    async fn fetch(&self, key: &CacheKey) -> Result<Vec<T>, TransportError> {
        let (reply, answer) = oneshot::channel();
        self.calls
            .send(FetchCall {
                key: key.clone(),
                reply,
            })
            .map_err(|_| abandoned())?;
        answer.await.unwrap_or_else(|_| Err(abandoned()))
    }
}

#[async_trait]
impl<T: CachedItem> Writer<T> for ManualWriter<T> {
    async fn write(&self, item: &T) -> Result<T, WriteError> {
        let (reply, answer) = oneshot::channel();
        self.calls
            .send(WriteCall {
                item: item.clone(),
                reply,
            })
            .map_err(|_| abandoned())?;
        answer.await.unwrap_or_else(|_| Err(abandoned().into()))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for products and collections.

    use super::*;
    use proptest::prelude::*;

    /// Generate a tentative product (no id).
    pub fn arb_product() -> impl Strategy<Value = Product> {
        (
            "[A-Za-z][A-Za-z0-9 ]{0,23}",
            "[0-9]{1,4}\\.[0-9]{2}",
            "[a-z ]{0,40}",
            prop::option::of("[a-z]{1,12}\\.png"),
        )
            .prop_map(|(name, price, description, image)| Product {
                id: None,
                name,
                price,
                description,
                image: image.unwrap_or_default(),
            })
    }

    /// Generate a committed collection with unique, ascending ids.
    pub fn arb_committed_products(max_len: usize) -> impl Strategy<Value = Vec<Product>> {
        prop::collection::vec(arb_product(), 0..=max_len).prop_map(|products| {
            products
                .into_iter()
                .zip(1i64..)
                .map(|(product, id)| product.with_id(id))
                .collect()
        })
    }

    /// Generate a collection mixing committed and tentative records.
    pub fn arb_products(max_len: usize) -> impl Strategy<Value = Vec<Product>> {
        prop::collection::vec((arb_product(), any::<bool>()), 0..=max_len).prop_map(|pairs| {
            pairs
                .into_iter()
                .zip(1i64..)
                .map(|((product, committed), id)| {
                    if committed {
                        product.with_id(id)
                    } else {
                        product
                    }
                })
                .collect()
        })
    }

    pub fn arb_conflict_policy() -> impl Strategy<Value = ConflictPolicy> {
        prop_oneof![Just(ConflictPolicy::Reject), Just(ConflictPolicy::Queue)]
    }

    pub fn arb_transport_error() -> impl Strategy<Value = TransportError> {
        prop_oneof![
            "[a-z ]{1,20}".prop_map(|reason| TransportError::Unreachable { reason }),
            (500u16..600, "[a-z ]{0,20}")
                .prop_map(|(status, message)| TransportError::Status { status, message }),
            Just(TransportError::Timeout),
        ]
    }

    pub fn arb_write_error() -> impl Strategy<Value = WriteError> {
        prop_oneof![
            arb_transport_error().prop_map(WriteError::Transport),
            "[a-z ]{1,20}".prop_map(|reason| WriteError::Validation(
                ValidationError::Rejected { reason }
            )),
            Just(WriteError::Validation(ValidationError::RequiredFieldMissing {
                field: "name".to_string(),
            })),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made caches and collections.

    use super::*;
    use std::sync::Arc;

    pub fn products_key() -> CacheKey {
        CacheKey::new("products")
    }

    /// Two committed products, ids 1 and 2.
    pub fn seed_products() -> Vec<Product> {
        vec![
            Product::named("Desk lamp")
                .with_id(1)
                .with_price("19.90")
                .with_description("warm white"),
            Product::named("Notebook")
                .with_id(2)
                .with_price("4.50")
                .with_image("notebook.png"),
        ]
    }

    pub type InMemoryCache = OptimisticCache<Product, InMemoryProducts, InMemoryProducts>;
    pub type ManualCache = OptimisticCache<Product, ManualFetcher<Product>, ManualWriter<Product>>;

    /// Cache backed by an [`InMemoryProducts`] seeded with `products`.
    pub fn in_memory_cache(
        products: Vec<Product>,
        config: CacheConfig,
    ) -> (InMemoryCache, Arc<InMemoryProducts>) {
        let server = Arc::new(InMemoryProducts::with_products(products));
        let cache = OptimisticCache::new(Arc::clone(&server), Arc::clone(&server), config);
        (cache, server)
    }

    /// Cache whose every fetch and write is answered by the test.
    pub fn manual_cache(
        config: CacheConfig,
    ) -> (
        ManualCache,
        ManualHandle<FetchCall<Product>>,
        ManualHandle<WriteCall<Product>>,
    ) {
        let (fetcher, fetches) = ManualFetcher::channel();
        let (writer, writes) = ManualWriter::channel();
        let cache = OptimisticCache::new(Arc::new(fetcher), Arc::new(writer), config);
        (cache, fetches, writes)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over cache state.

    use super::*;

    /// Assert the entry for `key` is idle and holds exactly `expected`.
    pub fn assert_settled<T>(store: &CacheStore<T>, key: &CacheKey, expected: &[T])
    where
        T: CachedItem + PartialEq,
    {
        let entry = store.get(key);
        assert_eq!(entry.status, EntryStatus::Idle, "entry {} not idle", key);
        assert!(entry.snapshot.is_none(), "entry {} still holds a snapshot", key);
        assert_eq!(entry.value.as_slice(), expected, "entry {} value", key);
    }

    /// Assert no record in the collection is tentative.
    pub fn assert_all_committed<T: CachedItem>(items: &[T]) {
        let tentative: Vec<_> = items.iter().filter(|item| item.is_tentative()).collect();
        assert!(
            tentative.is_empty(),
            "tentative records remain: {:?}",
            tentative
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
