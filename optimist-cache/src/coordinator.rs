//! Mutation coordinator.
//!
//! Drives one optimistic mutation against one key:
//!
//! ```text
//! suppress ──→ snapshot ──→ speculate ──→ write ──┬─ ok ──→ keep ───┬─→ reconcile ──→ release
//!                                                  └─ err ─→ restore ┘
//! ```
//!
//! Steps up to the speculative write run before [`MutationCoordinator::mutate`]
//! returns, so the tentative item is visible to readers immediately. The write,
//! the rollback and the reconcile fetch run in a spawned settlement task that
//! owns the mutation's snapshot and the key's mutation lock. If that task
//! unwinds, the entry is rolled back to the snapshot and left idle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use optimist_core::{
    CacheKey, CachedItem, ConflictError, ConflictPolicy, OptimistResult, TransportError,
    WriteError,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::{JoinError, JoinHandle};

use crate::gate::SuppressionGate;
use crate::store::CacheStore;
use crate::traits::{Fetcher, Writer};

/// State carried from the start of one mutation to its settlement.
#[derive(Debug)]
pub(crate) struct MutationContext<T> {
    key: CacheKey,
    /// The collection as it was before the tentative item was appended.
    snapshot: Arc<Vec<T>>,
    tentative: T,
    generation: u64,
    started_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Writing,
    Reconciling,
    Done,
}

/// Walks the store through settlement. Dropped before reaching
/// [`Phase::Done`], it restores the snapshot (if the write never settled)
/// and ends reconciliation, so the entry is never left `Mutating`.
struct Settling<T: CachedItem> {
    store: CacheStore<T>,
    context: MutationContext<T>,
    phase: Phase,
}

impl<T: CachedItem> Settling<T> {
    fn new(store: CacheStore<T>, context: MutationContext<T>) -> Self {
        Self {
            store,
            context,
            phase: Phase::Writing,
        }
    }

    fn commit(&mut self) {
        self.store.settle_mutation(&self.context.key, None);
        self.phase = Phase::Reconciling;
    }

    fn roll_back(&mut self) {
        let snapshot = Arc::clone(&self.context.snapshot);
        self.store.settle_mutation(&self.context.key, Some(snapshot));
        self.phase = Phase::Reconciling;
    }

    fn finish(&mut self, authoritative: Option<Vec<T>>) {
        self.store.finish_reconcile(&self.context.key, authoritative);
        self.phase = Phase::Done;
    }
}

impl<T: CachedItem> Drop for Settling<T> {
    fn drop(&mut self) {
        let key = self.context.key.clone();
        match self.phase {
            Phase::Writing => {
                tracing::warn!(
                    key = %key,
                    generation = self.context.generation,
                    "Settlement aborted during write, rolling back"
                );
                self.roll_back();
                self.store.finish_reconcile(&key, None);
            }
            Phase::Reconciling => {
                tracing::warn!(key = %key, "Settlement aborted during reconcile, keeping last value");
                self.store.finish_reconcile(&key, None);
            }
            Phase::Done => {}
        }
    }
}

/// Owned mutation lock for one key. Drops the key's lock from the map once
/// nobody else holds or waits on it.
struct KeyLock {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<CacheKey, Arc<Mutex<()>>>>,
    key: CacheKey,
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune_lock(&self.locks, &self.key);
    }
}

fn prune_lock(locks: &DashMap<CacheKey, Arc<Mutex<()>>>, key: &CacheKey) {
    locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
}

/// How the write itself ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement<T> {
    /// The server accepted the write and returned its canonical record.
    Committed(T),
    /// The write failed and the pre-mutation snapshot was restored.
    RolledBack(WriteError),
}

/// Everything a caller learns about a settled mutation.
#[derive(Debug, Clone)]
pub struct MutationReport<T> {
    pub key: CacheKey,
    pub settlement: Settlement<T>,
    /// Outcome of the post-settlement refetch: the number of records applied,
    /// or the error that left the last known value in place.
    pub reconcile: Result<usize, TransportError>,
    pub elapsed: Duration,
}

impl<T> MutationReport<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self.settlement, Settlement::Committed(_))
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self.settlement, Settlement::RolledBack(_))
    }

    pub fn canonical(&self) -> Option<&T> {
        match &self.settlement {
            Settlement::Committed(item) => Some(item),
            Settlement::RolledBack(_) => None,
        }
    }

    pub fn write_error(&self) -> Option<&WriteError> {
        match &self.settlement {
            Settlement::Committed(_) => None,
            Settlement::RolledBack(err) => Some(err),
        }
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconcile.is_ok()
    }

    /// Collapse the write outcome into a result.
    pub fn into_result(self) -> OptimistResult<T> {
        match self.settlement {
            Settlement::Committed(item) => Ok(item),
            Settlement::RolledBack(err) => Err(err.into()),
        }
    }
}

/// Handle to a mutation whose write is still in flight.
///
/// Dropping the handle does not cancel the write; the settlement task always
/// runs to completion.
#[derive(Debug)]
pub struct PendingMutation<T> {
    key: CacheKey,
    generation: u64,
    handle: JoinHandle<MutationReport<T>>,
}

impl<T> PendingMutation<T> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_settled(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for settlement and reconciliation.
    pub async fn settled(self) -> Result<MutationReport<T>, JoinError> {
        self.handle.await
    }
}

/// Lifts suppression when dropped, so a panicking writer cannot leave a key
/// suppressed forever.
struct SuppressionLease {
    gate: Arc<SuppressionGate>,
    key: CacheKey,
}

impl Drop for SuppressionLease {
    fn drop(&mut self) {
        self.gate.release(&self.key);
    }
}

/// Orchestrates optimistic mutations.
pub struct MutationCoordinator<T, F, W>
where
    T: CachedItem,
{
    store: CacheStore<T>,
    gate: Arc<SuppressionGate>,
    fetcher: Arc<F>,
    writer: Arc<W>,
    policy: ConflictPolicy,
    locks: Arc<DashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl<T, F, W> Clone for MutationCoordinator<T, F, W>
where
    T: CachedItem,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gate: Arc::clone(&self.gate),
            fetcher: Arc::clone(&self.fetcher),
            writer: Arc::clone(&self.writer),
            policy: self.policy,
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<T, F, W> MutationCoordinator<T, F, W>
where
    T: CachedItem,
    F: Fetcher<T> + 'static,
    W: Writer<T> + 'static,
{
    pub fn new(
        store: CacheStore<T>,
        gate: Arc<SuppressionGate>,
        fetcher: Arc<F>,
        writer: Arc<W>,
        policy: ConflictPolicy,
    ) -> Self {
        Self {
            store,
            gate,
            fetcher,
            writer,
            policy,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn store(&self) -> &CacheStore<T> {
        &self.store
    }

    pub fn gate(&self) -> &SuppressionGate {
        &self.gate
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(key.clone()).or_default())
    }

    /// Number of keys with a live mutation lock.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// True while a mutation for `key` is writing or reconciling.
    pub fn is_mutating(&self, key: &CacheKey) -> bool {
        self.locks
            .get(key)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Optimistically add `item` to the collection under `key`.
    ///
    /// Returns once the tentative item is visible in the store. Under
    /// [`ConflictPolicy::Reject`] a key with an unsettled mutation fails with
    /// [`ConflictError::MutationInProgress`] and the cache is left untouched;
    /// under [`ConflictPolicy::Queue`] the call waits for that mutation to
    /// settle and reconcile first.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn mutate(
        &self,
        key: &CacheKey,
        item: T,
    ) -> Result<PendingMutation<T>, ConflictError> {
        let lock = self.key_lock(key);
        let guard = match self.policy {
            ConflictPolicy::Reject => match lock.try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!(key = %key, "Rejected mutation while another is in flight");
                    prune_lock(&self.locks, key);
                    return Err(ConflictError::MutationInProgress { key: key.clone() });
                }
            },
            ConflictPolicy::Queue => lock.lock_owned().await,
        };
        let key_lock = KeyLock {
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
            key: key.clone(),
        };

        // Suppress before snapshotting so no fetch can land in between.
        let generation = self.gate.suppress(key);
        let lease = SuppressionLease {
            gate: Arc::clone(&self.gate),
            key: key.clone(),
        };

        let snapshot = self.store.begin_mutation(key, item.clone());
        let context = MutationContext {
            key: key.clone(),
            snapshot,
            tentative: item,
            generation,
            started_at: Instant::now(),
        };
        tracing::debug!(
            key = %key,
            generation,
            snapshot_len = context.snapshot.len(),
            "Applied optimistic update"
        );

        let coordinator = self.clone();
        let handle =
            tokio::spawn(async move { coordinator.settle(context, lease, key_lock).await });

        Ok(PendingMutation {
            key: key.clone(),
            generation,
            handle,
        })
    }

    async fn settle(
        self,
        context: MutationContext<T>,
        lease: SuppressionLease,
        _key_lock: KeyLock,
    ) -> MutationReport<T> {
        let key = context.key.clone();
        let started_at = context.started_at;
        let mut settling = Settling::new(self.store.clone(), context);

        let written = self.writer.write(&settling.context.tentative).await;
        let settlement = match written {
            Ok(canonical) => {
                // The tentative record has no identity to merge against; the
                // reconcile fetch below replaces it wholesale.
                settling.commit();
                tracing::info!(key = %key, id = ?canonical.server_id(), "Mutation committed");
                Settlement::Committed(canonical)
            }
            Err(err) => {
                settling.roll_back();
                tracing::warn!(key = %key, error = %err, "Mutation failed, rolled back");
                Settlement::RolledBack(err)
            }
        };

        let reconcile = match self.fetcher.fetch(&key).await {
            Ok(items) => {
                let len = items.len();
                settling.finish(Some(items));
                Ok(len)
            }
            Err(err) => {
                settling.finish(None);
                tracing::warn!(key = %key, error = %err, "Reconcile fetch failed, keeping last value");
                Err(err)
            }
        };

        drop(settling);
        drop(lease);

        MutationReport {
            key,
            settlement,
            reconcile,
            elapsed: started_at.elapsed(),
        }
    }
}
