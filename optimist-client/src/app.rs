//! Command execution against an [`OptimisticCache`].

use std::sync::Arc;

use optimist_cache::{Fetcher, MutationReport, OptimisticCache, Writer};
use optimist_core::{CacheKey, Product};

use crate::error::ClientError;

/// Load the collection (once) and return what the cache holds for `key`.
pub async fn list_products<F, W>(
    cache: &OptimisticCache<Product, F, W>,
    key: &CacheKey,
) -> Result<Arc<Vec<Product>>, ClientError>
where
    F: Fetcher<Product> + 'static,
    W: Writer<Product> + 'static,
{
    let outcome = cache.ensure(key).await?;
    tracing::debug!(key = %key, outcome = ?outcome, "collection loaded");
    Ok(cache.get(key).value)
}

/// Add `product` optimistically and wait for it to settle and reconcile.
///
/// `on_change` sees every version of the collection while the mutation is in
/// flight: the tentative row first, then either the reconciled collection or
/// the restored snapshot.
pub async fn add_product<F, W, L>(
    cache: &OptimisticCache<Product, F, W>,
    key: &CacheKey,
    product: Product,
    on_change: L,
) -> Result<MutationReport<Product>, ClientError>
where
    F: Fetcher<Product> + 'static,
    W: Writer<Product> + 'static,
    L: Fn(&[Product]) + Send + Sync + 'static,
{
    if let Err(err) = cache.ensure(key).await {
        tracing::warn!(key = %key, error = %err, "initial load failed, adding to empty collection");
    }

    let subscription = cache.subscribe(key, on_change);
    let pending = cache.mutate(key, product).await?;
    let report = pending.settled().await?;
    subscription.unsubscribe();

    if let Err(err) = &report.reconcile {
        tracing::warn!(key = %key, error = %err, "collection not refreshed after write");
    }
    Ok(report)
}
