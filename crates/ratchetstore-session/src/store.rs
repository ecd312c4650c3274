//! The shared handle every record operation goes through.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{RefreshPolicy, StoreConfig};
use crate::error::StoreError;
use crate::lock::RecordLocks;
use crate::recipient::RecipientId;
use crate::storage::{FileStorage, MemoryStorage, RecordKey, RecordStorage};

/// Storage, per-record locks and refresh policy bundled together.
///
/// Clones share the same storage and locks, so one store can be handed
/// to several worker threads.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn RecordStorage>,
    locks: Arc<RecordLocks>,
    refresh: RefreshPolicy,
}

impl SessionStore {
    pub fn new(storage: impl RecordStorage, refresh: RefreshPolicy) -> Self {
        Self {
            storage: Arc::new(storage),
            locks: Arc::new(RecordLocks::new()),
            refresh,
        }
    }

    /// File-backed store rooted at `config.sessions_dir`.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let storage = FileStorage::open(&config.sessions_dir)?;
        Ok(Self::new(storage, config.refresh.clone()))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new(), RefreshPolicy::default())
    }

    pub fn refresh_policy(&self) -> &RefreshPolicy {
        &self.refresh
    }

    pub(crate) fn read(&self, key: &RecordKey) -> Result<Option<Vec<u8>>, StoreError> {
        self.locks.with_lock(key, || self.storage.read(key))
    }

    /// Read and decode a record, degrading every failure to `None`.
    pub(crate) fn load_record<T>(
        &self,
        key: &RecordKey,
        decode: impl FnOnce(Vec<u8>) -> Result<T, StoreError>,
    ) -> Option<T> {
        decode_loaded(key, self.read(key), decode)
    }

    /// Read and decode a record, reporting absence as
    /// [`StoreError::NotFound`].
    pub(crate) fn try_load_record<T>(
        &self,
        key: &RecordKey,
        decode: impl FnOnce(Vec<u8>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let payload = self
            .read(key)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        decode(payload)
    }

    /// Run `f` against the raw storage while holding the record's lock,
    /// so a load-modify-save sequence cannot interleave with another
    /// operation on the same record.
    pub(crate) fn with_record<T>(
        &self,
        key: &RecordKey,
        f: impl FnOnce(&dyn RecordStorage) -> T,
    ) -> T {
        self.locks.with_lock(key, || f(self.storage.as_ref()))
    }

    pub(crate) fn write(&self, key: &RecordKey, payload: &[u8]) -> Result<(), StoreError> {
        self.locks.with_lock(key, || self.storage.write(key, payload))
    }

    /// Delete a record and drop its lock entry once nobody else uses it.
    pub(crate) fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        self.locks.with_lock(key, || self.storage.delete(key))?;
        self.locks.forget(key);
        Ok(())
    }

    /// Existence check that degrades to `false` on I/O failure.
    pub(crate) fn exists(&self, key: &RecordKey) -> bool {
        match self.storage.exists(key) {
            Ok(exists) => exists,
            Err(e) => {
                warn!(record = %key, "existence check failed: {}", e);
                false
            }
        }
    }

    /// Every record stored for `recipient`.
    pub fn keys_for(&self, recipient: RecipientId) -> Result<Vec<RecordKey>, StoreError> {
        self.storage.keys_for(recipient)
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

/// Absence is expected and logged at debug level. A payload that is
/// present but unreadable is logged as corrupted.
pub(crate) fn decode_loaded<T>(
    key: &RecordKey,
    read: Result<Option<Vec<u8>>, StoreError>,
    decode: impl FnOnce(Vec<u8>) -> Result<T, StoreError>,
) -> Option<T> {
    match read {
        Ok(None) => {
            debug!(record = %key, "no record found");
            None
        }
        Ok(Some(payload)) => match decode(payload) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(record = %key, "corrupted record, treating as absent: {}", e);
                None
            }
        },
        Err(e) => {
            warn!(record = %key, "failed to read record, treating as absent: {}", e);
            None
        }
    }
}
