//! In-memory delivery deduplication.
//!
//! The board system redelivers webhooks on non-2xx responses and sometimes
//! on flaky networks; the guard remembers processed delivery keys so a
//! redelivery is acknowledged without reprocessing. This provides
//! at-least-once tolerance, not exactly-once guarantees — the real
//! backstop is that reconciliation is idempotent at the data level.

use std::collections::HashSet;
use std::sync::Mutex;

pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded set of recently processed delivery keys.
pub struct DedupGuard {
    seen: Mutex<HashSet<String>>,
    capacity: usize,
}

impl DedupGuard {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            capacity,
        }
    }

    /// Whether this delivery key has not been processed yet.
    pub fn should_process(&self, key: &str) -> bool {
        !self.lock().contains(key)
    }

    /// Record a processed key. At capacity the whole set is cleared —
    /// O(1) eviction and bounded memory, at the cost of a short window
    /// where an old delivery could be reprocessed.
    pub fn mark_processed(&self, key: &str) {
        let mut seen = self.lock();
        if seen.len() >= self.capacity {
            seen.clear();
        }
        seen.insert(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
