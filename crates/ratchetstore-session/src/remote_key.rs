//! Public keys the remote party advertised for the legacy session.
//!
//! The remote side advances its own keys; this record only keeps the
//! most recent key it advertised and the one before it.

use ratchetstore_crypto::{MasterCipher, RatchetPublicKey};
use tracing::debug;

use crate::blob::{RecordReader, RecordWriter};
use crate::error::StoreError;
use crate::recipient::{CanonicalRecipient, RecipientId};
use crate::store::SessionStore;
use crate::storage::RecordKey;

#[derive(Debug, Clone)]
pub struct RemoteKeyRecord {
    recipient: RecipientId,
    current: Option<RatchetPublicKey>,
    last: Option<RatchetPublicKey>,
}

impl RemoteKeyRecord {
    pub fn new(recipient: &impl CanonicalRecipient) -> Self {
        Self {
            recipient: recipient.recipient_id(),
            current: None,
            last: None,
        }
    }

    /// Load the record, or an empty one if it is absent or unreadable.
    pub fn load(
        store: &SessionStore,
        master: &dyn MasterCipher,
        recipient: &impl CanonicalRecipient,
    ) -> Self {
        let recipient = recipient.recipient_id();
        debug!(%recipient, "loading remote key record");
        store
            .load_record(&RecordKey::remote(recipient), |payload| {
                Self::decode(recipient, master, payload)
            })
            .unwrap_or_else(|| Self::new(&recipient))
    }

    pub fn try_load(
        store: &SessionStore,
        master: &dyn MasterCipher,
        recipient: &impl CanonicalRecipient,
    ) -> Result<Self, StoreError> {
        let recipient = recipient.recipient_id();
        store.try_load_record(&RecordKey::remote(recipient), |payload| {
            Self::decode(recipient, master, payload)
        })
    }

    pub fn has_record(store: &SessionStore, recipient: &impl CanonicalRecipient) -> bool {
        store.exists(&RecordKey::remote(recipient.recipient_id()))
    }

    pub fn delete(store: &SessionStore, recipient: &impl CanonicalRecipient) -> Result<(), StoreError> {
        store.delete(&RecordKey::remote(recipient.recipient_id()))
    }

    pub fn recipient(&self) -> RecipientId {
        self.recipient
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.last.is_none()
    }

    /// Record a newly received key. The previous current key becomes the
    /// last key; re-receiving the current key changes nothing.
    pub fn update_current_remote_key(&mut self, key: RatchetPublicKey) {
        if self.current.as_ref().is_some_and(|current| current.id() == key.id()) {
            return;
        }
        debug!(recipient = %self.recipient, key_id = key.id(), "new remote key");
        self.last = self.current.replace(key);
    }

    pub fn set_current_remote_key(&mut self, key: RatchetPublicKey) {
        self.current = Some(key);
    }

    pub fn set_last_remote_key(&mut self, key: RatchetPublicKey) {
        self.last = Some(key);
    }

    pub fn current_remote_key(&self) -> Option<&RatchetPublicKey> {
        self.current.as_ref()
    }

    pub fn last_remote_key(&self) -> Option<&RatchetPublicKey> {
        self.last.as_ref()
    }

    pub fn key_for_id(&self, id: u32) -> Result<&RatchetPublicKey, StoreError> {
        [self.current.as_ref(), self.last.as_ref()]
            .into_iter()
            .flatten()
            .find(|key| key.id() == id)
            .ok_or(StoreError::InvalidKeyId(id))
    }

    /// Seal current then last (empty when unset) and write them durably.
    pub fn save(&self, store: &SessionStore, master: &dyn MasterCipher) -> Result<(), StoreError> {
        let current = self
            .current
            .as_ref()
            .ok_or(StoreError::IncompleteRecord("current remote key"))?;

        let mut writer = RecordWriter::new(master);
        writer.write_blob(&current.serialize())?;
        writer.write_blob(&self.last.as_ref().map(RatchetPublicKey::serialize).unwrap_or_default())?;
        store.write(&RecordKey::remote(self.recipient), &writer.finish())
    }

    fn decode(
        recipient: RecipientId,
        master: &dyn MasterCipher,
        payload: Vec<u8>,
    ) -> Result<Self, StoreError> {
        let mut reader = RecordReader::new(master, payload);
        let current = RatchetPublicKey::deserialize(&reader.read_blob()?)
            .map_err(StoreError::from_key_error)?;
        let last_bytes = reader.read_blob()?;
        let last = if last_bytes.is_empty() {
            None
        } else {
            Some(RatchetPublicKey::deserialize(&last_bytes).map_err(StoreError::from_key_error)?)
        };
        reader.finish()?;
        Ok(Self {
            recipient,
            current: Some(current),
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use ratchetstore_crypto::{CurveType, KeyPair, MasterSecret};

    use super::*;

    const R: RecipientId = RecipientId(11);

    fn remote_key(id: u32) -> RatchetPublicKey {
        KeyPair::generate(id, CurveType::Djb).ratchet_public_key()
    }

    #[test]
    fn absent_record_loads_empty() {
        let store = SessionStore::in_memory();
        let master = MasterSecret::generate().unwrap();
        assert!(RemoteKeyRecord::load(&store, &master, &R).is_empty());
    }

    #[test]
    fn update_shifts_current_to_last() {
        let mut record = RemoteKeyRecord::new(&R);
        let first = remote_key(1);
        let second = remote_key(2);

        record.update_current_remote_key(first.clone());
        assert!(record.last_remote_key().is_none());

        record.update_current_remote_key(second.clone());
        assert_eq!(record.current_remote_key(), Some(&second));
        assert_eq!(record.last_remote_key(), Some(&first));

        // Duplicate delivery of the current key.
        record.update_current_remote_key(second.clone());
        assert_eq!(record.last_remote_key(), Some(&first));
    }

    #[test]
    fn save_then_load_roundtrip() {
        let store = SessionStore::in_memory();
        let master = MasterSecret::generate().unwrap();

        let mut record = RemoteKeyRecord::new(&R);
        record.update_current_remote_key(remote_key(3));
        record.save(&store, &master).unwrap();
        let loaded = RemoteKeyRecord::load(&store, &master, &R);
        assert_eq!(loaded.current_remote_key(), record.current_remote_key());
        assert!(loaded.last_remote_key().is_none());

        record.update_current_remote_key(remote_key(4));
        record.save(&store, &master).unwrap();
        let loaded = RemoteKeyRecord::load(&store, &master, &R);
        assert_eq!(loaded.current_remote_key().unwrap().id(), 4);
        assert_eq!(loaded.last_remote_key().unwrap().id(), 3);
    }

    #[test]
    fn key_for_id() {
        let mut record = RemoteKeyRecord::new(&R);
        record.update_current_remote_key(remote_key(8));
        record.update_current_remote_key(remote_key(9));
        assert_eq!(record.key_for_id(8).unwrap().id(), 8);
        assert_eq!(record.key_for_id(9).unwrap().id(), 9);
        assert!(matches!(record.key_for_id(10), Err(StoreError::InvalidKeyId(10))));
    }

    #[test]
    fn empty_record_cannot_be_saved() {
        let store = SessionStore::in_memory();
        let master = MasterSecret::generate().unwrap();
        assert!(RemoteKeyRecord::new(&R).save(&store, &master).is_err());
        assert!(!RemoteKeyRecord::has_record(&store, &R));
    }
}
