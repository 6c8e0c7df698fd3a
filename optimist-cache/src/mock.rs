//! In-memory product collection for tests and demos.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use optimist_core::{
    CacheKey, Product, ProductId, TransportError, ValidationError, WriteError,
};

use crate::traits::{Fetcher, Writer};

/// Server-side stand-in: a single product collection that assigns ids on
/// write.
///
/// Every key fetches the same collection.
#[derive(Debug)]
pub struct InMemoryProducts {
    products: RwLock<Vec<Product>>,
    next_id: AtomicI64,
    fail_writes: AtomicBool,
    fail_fetches: AtomicBool,
    fetch_count: AtomicUsize,
    write_count: AtomicUsize,
}

impl Default for InMemoryProducts {
    fn default() -> Self {
        Self {
            products: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            fail_writes: AtomicBool::new(false),
            fail_fetches: AtomicBool::new(false),
            fetch_count: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
        }
    }
}

impl InMemoryProducts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the collection. Ids continue after the highest seeded id.
    pub fn with_products(products: Vec<Product>) -> Self {
        let next = products
            .iter()
            .filter_map(|p| p.id.map(|id| id.get()))
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            products: RwLock::new(products),
            next_id: AtomicI64::new(next),
            ..Self::default()
        }
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent fetch fail (or succeed again).
    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Copy of the server-side collection.
    pub fn snapshot(&self) -> Vec<Product> {
        match self.products.read() {
            Ok(products) => products.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn poisoned() -> TransportError {
        TransportError::Unreachable {
            reason: "in-memory collection lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl Fetcher<Product> for InMemoryProducts {
    async fn fetch(&self, _key: &CacheKey) -> Result<Vec<Product>, TransportError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable {
                reason: "fetches disabled".to_string(),
            });
        }
        let products = self.products.read().map_err(|_| Self::poisoned())?;
        Ok(products.clone())
    }
}

#[async_trait]
impl Writer<Product> for InMemoryProducts {
    async fn write(&self, item: &Product) -> Result<Product, WriteError> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                status: 503,
                message: "writes disabled".to_string(),
            }
            .into());
        }
        if item.name.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "name".to_string(),
            }
            .into());
        }

        let id = ProductId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let canonical = Product {
            id: Some(id),
            ..item.clone()
        };
        self.products
            .write()
            .map_err(|_| Self::poisoned())?
            .push(canonical.clone());
        Ok(canonical)
    }
}
