//! Per-request warning store.
//!
//! One [`WarningStore`] exists per logical request. Every sub-request of that
//! request appends into the same store through a shared `Arc`. Records are
//! deduplicated by exact text and kept in first-insertion order.

use crate::warning::WarningRecord;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Opaque identity of the logical request owning a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Default)]
struct Records {
    ordered: Vec<WarningRecord>,
    seen: HashSet<String>,
}

/// Deduplicated, insertion-ordered set of warnings for one logical request.
pub struct WarningStore {
    owner: RequestId,
    records: Mutex<Records>,
    /// 0 means unlimited
    max_records: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl WarningStore {
    /// Create an empty, unbounded store.
    pub fn new(owner: RequestId) -> Self {
        Self::with_capacity_limit(owner, 0)
    }

    /// Create an empty store that keeps at most `max_records` distinct warnings.
    pub fn with_capacity_limit(owner: RequestId, max_records: usize) -> Self {
        Self {
            owner,
            records: Mutex::new(Records::default()),
            max_records,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn owner(&self) -> RequestId {
        self.owner
    }

    /// Append `text` unless an identical record exists or the store is closed.
    ///
    /// Returns `true` if a new record was inserted. The closed check, the
    /// duplicate check and the insert happen under one lock, so racing
    /// identical appends store one record and nothing lands after `close`.
    pub fn record(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        let mut records = self.lock();
        if self.is_closed() || records.seen.contains(&text) {
            return false;
        }
        if self.max_records > 0 && records.ordered.len() >= self.max_records {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        records.seen.insert(text.clone());
        records.ordered.push(WarningRecord::new(text));
        true
    }

    /// Snapshot of all records in insertion order. Does not clear the store.
    pub fn drain(&self) -> Vec<WarningRecord> {
        self.lock().ordered.clone()
    }

    pub fn contains(&self, text: &str) -> bool {
        self.lock().seen.contains(text)
    }

    pub fn len(&self) -> usize {
        self.lock().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct warnings rejected because the store was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting records. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        let _records = self.lock();
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // A panic while holding the lock cannot leave `Records` half-updated in a
    // way that matters here, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for WarningStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarningStore")
            .field("owner", &self.owner)
            .field("records", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn texts(store: &WarningStore) -> Vec<String> {
        store.drain().into_iter().map(WarningRecord::into_text).collect()
    }

    #[test]
    fn test_record_deduplicates_by_text() {
        let store = WarningStore::new(RequestId::new());
        assert!(store.record("[a] setting was deprecated"));
        assert!(store.record("[b] setting was deprecated"));
        assert!(!store.record("[a] setting was deprecated"));
        assert!(!store.record(String::from("[b] setting was deprecated")));

        assert_eq!(
            texts(&store),
            vec!["[a] setting was deprecated", "[b] setting was deprecated"]
        );
    }

    #[test]
    fn test_drain_does_not_clear() {
        let store = WarningStore::new(RequestId::new());
        store.record("one");
        store.record("two");
        assert_eq!(store.drain(), store.drain());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_closed_store_rejects_records() {
        let store = WarningStore::new(RequestId::new());
        store.record("before");
        assert!(store.close());
        assert!(!store.close());
        assert!(!store.record("after"));
        assert_eq!(texts(&store), vec!["before"]);
    }

    #[test]
    fn test_capacity_limit_counts_dropped() {
        let store = WarningStore::with_capacity_limit(RequestId::new(), 2);
        store.record("a");
        store.record("b");
        store.record("c");
        store.record("a");
        assert_eq!(store.len(), 2);
        assert_eq!(store.dropped(), 1);
    }

    #[test]
    fn test_concurrent_identical_records_store_once() {
        let store = Arc::new(WarningStore::new(RequestId::new()));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..100 {
                        store.record("shared deprecation");
                        store.record(format!("worker {} deprecation", i % 4));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 5);
        assert!(store.contains("shared deprecation"));
        for i in 0..4 {
            assert!(store.contains(&format!("worker {} deprecation", i)));
        }
    }

    #[test]
    fn test_close_races_with_writers() {
        let store = Arc::new(WarningStore::new(RequestId::new()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for n in 0..500 {
                        store.record(format!("worker {} deprecation {}", i, n));
                    }
                })
            })
            .collect();

        thread::yield_now();
        store.close();
        let at_close = store.len();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), at_close);
    }

    #[test]
    fn test_owner_is_stable() {
        let id = RequestId::new();
        let store = WarningStore::new(id);
        assert_eq!(store.owner(), id);
        assert_ne!(RequestId::new(), id);
    }
}
