//! Query suppression gate.
//!
//! Each key carries a monotonically increasing generation. A fetch captures
//! the generation when it launches (its [`FetchTicket`]); suppressing a key
//! advances the generation, so every ticket issued before the suppression can
//! no longer be applied, no matter when its response arrives.
//!
//! State for a key is dropped once it is neither suppressed nor backing an
//! outstanding ticket, so the generation restarts from zero afterwards.

use dashmap::DashMap;
use optimist_core::{CacheKey, StaleSuppressionError};

/// Per-key gate state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GateState {
    /// Advanced on every `suppress`.
    generation: u64,
    suppressed: bool,
    /// Tickets issued and not yet finished.
    tickets: usize,
}

impl GateState {
    fn is_vacant(&self) -> bool {
        !self.suppressed && self.tickets == 0
    }
}

/// Proof that a fetch was launched while its key was not suppressed.
///
/// The ticket is only valid for the generation it captured. Hand it back
/// through [`SuppressionGate::finish_fetch`] when the fetch is over.
#[derive(Debug, PartialEq, Eq)]
pub struct FetchTicket {
    key: CacheKey,
    generation: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Suppresses background fetches for keys with a pending optimistic write.
#[derive(Debug, Default)]
pub struct SuppressionGate {
    keys: DashMap<CacheKey, GateState>,
}

impl SuppressionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` suppressed and invalidate every outstanding ticket for it.
    ///
    /// Returns the new generation. Suppressing an already suppressed key
    /// still advances the generation.
    pub fn suppress(&self, key: &CacheKey) -> u64 {
        let mut state = self.keys.entry(key.clone()).or_default();
        state.generation += 1;
        state.suppressed = true;
        tracing::debug!(key = %key, generation = state.generation, "Suppressed queries");
        state.generation
    }

    /// Lift suppression for `key`.
    ///
    /// Suppression is a flag, not a count: one release undoes any number of
    /// suppress calls.
    pub fn release(&self, key: &CacheKey) {
        if let Some(mut state) = self.keys.get_mut(key) {
            state.suppressed = false;
            tracing::debug!(key = %key, generation = state.generation, "Released queries");
        }
        self.prune(key);
    }

    pub fn is_suppressed(&self, key: &CacheKey) -> bool {
        self.keys.get(key).map(|s| s.suppressed).unwrap_or(false)
    }

    /// Current generation for `key` (zero if never suppressed).
    pub fn generation(&self, key: &CacheKey) -> u64 {
        self.keys.get(key).map(|s| s.generation).unwrap_or(0)
    }

    /// Obtain a ticket for a new fetch, or `None` while `key` is suppressed.
    pub fn begin_fetch(&self, key: &CacheKey) -> Option<FetchTicket> {
        let mut state = self.keys.entry(key.clone()).or_default();
        if state.suppressed {
            return None;
        }
        state.tickets += 1;
        Some(FetchTicket {
            key: key.clone(),
            generation: state.generation,
        })
    }

    /// Return a ticket once its fetch has applied or dropped its result.
    pub fn finish_fetch(&self, ticket: &FetchTicket) {
        if let Some(mut state) = self.keys.get_mut(&ticket.key) {
            state.tickets = state.tickets.saturating_sub(1);
        }
        self.prune(&ticket.key);
    }

    fn prune(&self, key: &CacheKey) {
        self.keys.remove_if(key, |_, state| state.is_vacant());
    }

    /// Number of keys with live gate state.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Check that a ticket may still apply its result.
    pub fn check(&self, ticket: &FetchTicket) -> Result<(), StaleSuppressionError> {
        let state = self.keys.get(&ticket.key).map(|s| *s).unwrap_or_default();
        if state.suppressed || state.generation != ticket.generation {
            return Err(StaleSuppressionError {
                key: ticket.key.clone(),
                ticket_generation: ticket.generation,
                current_generation: state.generation,
                suppressed: state.suppressed,
            });
        }
        Ok(())
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.check(ticket).is_ok()
    }
}
