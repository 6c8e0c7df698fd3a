//! Keyed cache store.
//!
//! The store owns one [`EntrySlot`] per [`CacheKey`]: the current collection,
//! its [`EntryStatus`], the rollback snapshot of a pending mutation and the
//! subscribers to notify when the collection changes. Every slot lives behind
//! the concurrent map's per-shard lock, so each read-modify-write of a key is
//! a single critical section. Subscribers are always invoked after that lock
//! has been released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use optimist_core::{CacheKey, CachedItem, EntryStatus, Timestamp};

type Listener<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

/// Read view of one cached collection.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The collection consumers should render.
    pub value: Arc<Vec<T>>,
    pub status: EntryStatus,
    /// Pre-mutation value; present if and only if `status` is `Mutating`.
    pub snapshot: Option<Arc<Vec<T>>>,
    /// When a value was last applied. `None` means never loaded.
    pub updated_at: Option<Timestamp>,
}

impl<T> CacheEntry<T> {
    /// Nothing has ever been applied and a fetch is running.
    pub fn is_loading(&self) -> bool {
        self.updated_at.is_none() && self.status == EntryStatus::Fetching
    }

    pub fn is_loaded(&self) -> bool {
        self.updated_at.is_some()
    }
}

struct EntrySlot<T> {
    value: Arc<Vec<T>>,
    status: EntryStatus,
    snapshot: Option<Arc<Vec<T>>>,
    updated_at: Option<Timestamp>,
    fetches_in_flight: u32,
    reconciling: bool,
    listeners: Vec<(u64, Listener<T>)>,
    /// Lost its last subscriber while busy; discarded once it goes idle.
    orphaned: bool,
}

impl<T> Default for EntrySlot<T> {
    fn default() -> Self {
        Self {
            value: Arc::new(Vec::new()),
            status: EntryStatus::Idle,
            snapshot: None,
            updated_at: None,
            fetches_in_flight: 0,
            reconciling: false,
            listeners: Vec::new(),
            orphaned: false,
        }
    }
}

impl<T> EntrySlot<T> {
    fn view(&self) -> CacheEntry<T> {
        CacheEntry {
            value: Arc::clone(&self.value),
            status: self.status,
            snapshot: self.snapshot.clone(),
            updated_at: self.updated_at,
        }
    }

    fn replace(&mut self, value: Arc<Vec<T>>) -> Notification<T> {
        self.value = value;
        self.updated_at = Some(Utc::now());
        Notification {
            value: Arc::clone(&self.value),
            listeners: self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
        }
    }

    /// Derive the status from the bookkeeping fields.
    fn settle_status(&mut self) {
        self.status = if self.snapshot.is_some() {
            EntryStatus::Mutating
        } else if self.reconciling || self.fetches_in_flight > 0 {
            EntryStatus::Fetching
        } else {
            EntryStatus::Idle
        };
    }
}

/// Value and listeners captured under the lock, delivered after it is released.
struct Notification<T> {
    value: Arc<Vec<T>>,
    listeners: Vec<Listener<T>>,
}

impl<T> Notification<T> {
    fn deliver(self) {
        for listener in &self.listeners {
            listener(&self.value);
        }
    }
}

struct StoreInner<T> {
    entries: DashMap<CacheKey, EntrySlot<T>>,
    next_listener_id: AtomicU64,
    discard_unsubscribed: bool,
}

/// Keyed mapping from cache key to collection, status and subscribers.
///
/// Cloning a store is cheap; clones share the same entries.
pub struct CacheStore<T: CachedItem> {
    inner: Arc<StoreInner<T>>,
}

impl<T: CachedItem> Clone for CacheStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CachedItem> Default for CacheStore<T> {
    fn default() -> Self {
        Self::new(true)
    }
}

impl<T: CachedItem> CacheStore<T> {
    /// Create a store. With `discard_unsubscribed`, an idle entry is dropped
    /// as soon as its last subscriber unsubscribes.
    pub fn new(discard_unsubscribed: bool) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                entries: DashMap::new(),
                next_listener_id: AtomicU64::new(1),
                discard_unsubscribed,
            }),
        }
    }

    /// Current entry for `key`, creating an empty idle one if absent.
    pub fn get(&self, key: &CacheKey) -> CacheEntry<T> {
        self.inner.entries.entry(key.clone()).or_default().view()
    }

    /// Current entry for `key` without creating it.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.inner.entries.get(key).map(|slot| slot.view())
    }

    /// Current collection for `key`.
    pub fn value(&self, key: &CacheKey) -> Arc<Vec<T>> {
        self.get(key).value
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Replace the collection for `key` and notify its subscribers.
    ///
    /// Status and snapshot are left untouched.
    pub fn set_value(&self, key: &CacheKey, value: Vec<T>) {
        self.set_shared_value(key, Arc::new(value));
    }

    fn set_shared_value(&self, key: &CacheKey, value: Arc<Vec<T>>) {
        let notification = {
            let mut slot = self.inner.entries.entry(key.clone()).or_default();
            slot.replace(value)
        };
        notification.deliver();
    }

    /// Read-modify-write of the collection for `key`, then notify.
    pub fn update_value<F>(&self, key: &CacheKey, update: F)
    where
        F: FnOnce(&[T]) -> Vec<T>,
    {
        let notification = {
            let mut slot = self.inner.entries.entry(key.clone()).or_default();
            let next = update(&slot.value);
            slot.replace(Arc::new(next))
        };
        notification.deliver();
    }

    /// Overwrite the status of `key`. No notification.
    pub fn set_status(&self, key: &CacheKey, status: EntryStatus) {
        self.inner.entries.entry(key.clone()).or_default().status = status;
    }

    /// Overwrite the rollback snapshot of `key`. No notification.
    pub fn set_snapshot(&self, key: &CacheKey, snapshot: Option<Vec<T>>) {
        self.inner.entries.entry(key.clone()).or_default().snapshot = snapshot.map(Arc::new);
    }

    /// Apply `value` only if `check` passes, inside the key's critical section.
    ///
    /// Returns the check's error when the value was not applied.
    pub fn apply_if<E, C>(&self, key: &CacheKey, value: Vec<T>, check: C) -> Result<(), E>
    where
        C: FnOnce() -> Result<(), E>,
    {
        let notification = {
            let mut slot = self.inner.entries.entry(key.clone()).or_default();
            check()?;
            slot.replace(Arc::new(value))
        };
        notification.deliver();
        Ok(())
    }

    /// Snapshot the current collection, append the tentative item and enter
    /// the `Mutating` state, all in one critical section.
    ///
    /// Returns the snapshot.
    pub(crate) fn begin_mutation(&self, key: &CacheKey, tentative: T) -> Arc<Vec<T>> {
        let (snapshot, notification) = {
            let mut slot = self.inner.entries.entry(key.clone()).or_default();
            if slot.snapshot.is_some() {
                tracing::warn!(key = %key, "Replacing leftover mutation snapshot");
            }
            let snapshot = Arc::clone(&slot.value);
            let mut speculative = Vec::with_capacity(snapshot.len() + 1);
            speculative.extend(snapshot.iter().cloned());
            speculative.push(tentative);
            slot.snapshot = Some(Arc::clone(&snapshot));
            slot.settle_status();
            let notification = slot.replace(Arc::new(speculative));
            (snapshot, notification)
        };
        notification.deliver();
        snapshot
    }

    /// Leave the `Mutating` state and start reconciling. With `restore`, the
    /// collection is rolled back to it first.
    pub(crate) fn settle_mutation(&self, key: &CacheKey, restore: Option<Arc<Vec<T>>>) {
        let notification = {
            let mut slot = self.inner.entries.entry(key.clone()).or_default();
            slot.snapshot = None;
            slot.reconciling = true;
            slot.settle_status();
            restore.map(|value| slot.replace(value))
        };
        if let Some(notification) = notification {
            notification.deliver();
        }
    }

    /// Finish reconciling, applying the authoritative collection if one was
    /// fetched.
    pub(crate) fn finish_reconcile(&self, key: &CacheKey, authoritative: Option<Vec<T>>) {
        let notification = {
            let mut slot = self.inner.entries.entry(key.clone()).or_default();
            slot.reconciling = false;
            slot.settle_status();
            authoritative.map(|value| slot.replace(Arc::new(value)))
        };
        if let Some(notification) = notification {
            notification.deliver();
        }
        self.inner.discard_if_orphaned(key);
    }

    pub(crate) fn fetch_started(&self, key: &CacheKey) {
        let mut slot = self.inner.entries.entry(key.clone()).or_default();
        slot.fetches_in_flight += 1;
        slot.settle_status();
    }

    pub(crate) fn fetch_finished(&self, key: &CacheKey) {
        if let Some(mut slot) = self.inner.entries.get_mut(key) {
            slot.fetches_in_flight = slot.fetches_in_flight.saturating_sub(1);
            slot.settle_status();
        }
        self.inner.discard_if_orphaned(key);
    }

    /// Register `on_change` for every value change of `key`.
    ///
    /// The entry is created if absent. Dropping the returned handle
    /// unsubscribes.
    pub fn subscribe<F>(&self, key: &CacheKey, on_change: F) -> Subscription<T>
    where
        F: Fn(&[T]) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut slot = self.inner.entries.entry(key.clone()).or_default();
            slot.listeners.push((id, Arc::new(on_change)));
            slot.orphaned = false;
        }
        Subscription {
            store: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
        }
    }

    /// Number of live subscriptions for `key`.
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.inner
            .entries
            .get(key)
            .map(|slot| slot.listeners.len())
            .unwrap_or(0)
    }
}

impl<T> StoreInner<T> {
    fn unsubscribe(&self, key: &CacheKey, id: u64) {
        let now_unreferenced = match self.entries.get_mut(key) {
            Some(mut slot) => {
                slot.listeners.retain(|(listener_id, _)| *listener_id != id);
                let empty = slot.listeners.is_empty();
                if empty && self.discard_unsubscribed {
                    slot.orphaned = true;
                }
                empty
            }
            None => return,
        };
        if now_unreferenced {
            self.discard_if_orphaned(key);
        }
    }

    /// Remove `key` if its last subscriber has left and nothing is in flight.
    fn discard_if_orphaned(&self, key: &CacheKey) {
        let removed = self.entries.remove_if(key, |_, slot| {
            slot.orphaned && slot.listeners.is_empty() && slot.status == EntryStatus::Idle
        });
        if removed.is_some() {
            tracing::debug!(key = %key, "Discarded unreferenced cache entry");
        }
    }
}

/// Handle returned by [`CacheStore::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription<T> {
    store: Weak<StoreInner<T>>,
    key: CacheKey,
    id: u64,
}

impl<T> Subscription<T> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Unsubscribe now.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(&self.key, self.id);
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}
