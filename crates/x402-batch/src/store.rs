use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::X402Error;

/// Server-side authoritative request counters, keyed by the opaque TokenID
/// minted at issuance.
///
/// Implementations must be safe for unbounded concurrent use.
pub trait TokenCounterStore: Send + Sync {
    /// Initialise a counter for a newly issued token with the given total
    /// allowance. Calling `register` again for the same TokenID is a no-op;
    /// issuance happens exactly once.
    fn register(&self, token_id: &str, total: i64) -> Result<(), X402Error>;

    /// Atomically consume one credit and return the number remaining.
    /// Returns [`X402Error::TokenExhausted`] when the allowance is reached and
    /// [`X402Error::TokenNotFound`] if the token was never registered.
    ///
    /// `claimed_total` comes from the signed token claims; the stored
    /// allowance is authoritative and wins on any mismatch.
    fn use_request(&self, token_id: &str, claimed_total: i64) -> Result<i64, X402Error>;
}

struct Entry {
    used: AtomicI64,
    total: i64,
}

/// In-memory [`TokenCounterStore`]. State is lost on process restart; clients
/// holding tokens issued before a restart get a `token_not_found` 402 and must
/// pay again.
pub struct InMemoryTokenStore {
    entries: DashMap<String, Arc<Entry>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for InMemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounterStore for InMemoryTokenStore {
    fn register(&self, token_id: &str, total: i64) -> Result<(), X402Error> {
        if total <= 0 {
            return Err(X402Error::InvalidAllowance(total));
        }
        // The entry API makes register-if-absent a single critical section;
        // a concurrent re-registration never replaces the existing counter.
        self.entries
            .entry(token_id.to_string())
            .or_insert_with(|| {
                Arc::new(Entry {
                    used: AtomicI64::new(0),
                    total,
                })
            });
        Ok(())
    }

    fn use_request(&self, token_id: &str, _claimed_total: i64) -> Result<i64, X402Error> {
        let entry = match self.entries.get(token_id) {
            Some(e) => Arc::clone(&e),
            None => return Err(X402Error::TokenNotFound),
        };

        // CAS loop: `used` never exceeds `total`, even transiently, so every
        // observer sees a consistent counter.
        loop {
            let used = entry.used.load(Ordering::Acquire);
            if used >= entry.total {
                return Err(X402Error::TokenExhausted);
            }
            if entry
                .used
                .compare_exchange(used, used + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(entry.total - used - 1);
            }
        }
    }
}
