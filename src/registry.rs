//! Keyed element registry shared by the scheduler's managers.
//!
//! A thin concurrent container with monotonic id allocation. Iteration always
//! happens on a [`snapshot`](Registry::snapshot) copy so no lock is held while
//! handlers run.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Concurrent id-keyed container.
pub(crate) struct Registry<T: Clone> {
    seq: AtomicU64,
    items: DashMap<u64, T>,
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            items: DashMap::new(),
        }
    }

    /// Allocates the next unique id.
    pub fn next_id(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Inserts `item` under `id`; a second insert with the same id keeps the
    /// existing item.
    pub fn insert(&self, id: u64, item: T) {
        self.items.entry(id).or_insert(item);
    }

    pub fn remove(&self, id: u64) -> Option<T> {
        self.items.remove(&id).map(|(_, v)| v)
    }

    /// Copies the current contents for lock-free iteration.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().map(|e| e.value().clone()).collect()
    }

    /// Like [`snapshot`](Self::snapshot), keyed by id.
    pub fn snapshot_with_ids(&self) -> Vec<(u64, T)> {
        self.items
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
