//! In-memory record storage for tests and ephemeral stores.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{RecordKey, RecordStorage};
use crate::error::StoreError;
use crate::recipient::RecipientId;

/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Arc<RwLock<HashMap<RecordKey, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl RecordStorage for MemoryStorage {
    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError> {
        Ok(self.records.read().contains_key(key))
    }

    fn read(&self, key: &RecordKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.records.read().get(key).cloned())
    }

    fn write(&self, key: &RecordKey, payload: &[u8]) -> Result<(), StoreError> {
        self.records.write().insert(*key, payload.to_vec());
        Ok(())
    }

    fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        self.records.write().remove(key);
        Ok(())
    }

    fn keys_for(&self, recipient: RecipientId) -> Result<Vec<RecordKey>, StoreError> {
        Ok(self
            .records
            .read()
            .keys()
            .filter(|key| key.recipient == recipient)
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_records() {
        let a = MemoryStorage::new();
        let b = a.clone();
        let key = RecordKey::local(RecipientId(3));

        a.write(&key, b"payload").unwrap();
        assert!(b.exists(&key).unwrap());
        assert_eq!(b.read(&key).unwrap().unwrap(), b"payload");

        b.delete(&key).unwrap();
        assert!(a.is_empty());
    }
}
