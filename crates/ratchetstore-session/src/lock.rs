//! Per-record mutual exclusion.
//!
//! Every load, save and delete of a record runs under the mutex for its
//! [`RecordKey`]. Operations on the same record are serialized; records
//! with different keys never contend.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::storage::RecordKey;

#[derive(Debug, Default)]
pub struct RecordLocks {
    locks: DashMap<RecordKey, Arc<Mutex<()>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: &RecordKey, f: impl FnOnce() -> T) -> T {
        // The map shard guard is released before blocking on the record mutex.
        let lock = Arc::clone(self.locks.entry(*key).or_default().value());
        let _guard = lock.lock();
        f()
    }

    /// Drop the lock entry for `key` unless another caller holds or waits
    /// on it.
    pub fn forget(&self, key: &RecordKey) {
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of record keys with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
