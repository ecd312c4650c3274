//! The local user's rotating key pairs for one recipient.
//!
//! The record holds a current and a next key pair. When the remote party
//! acknowledges the next key, it is promoted to current and a fresh next
//! pair is generated on the following id.

use ratchetstore_crypto::{next_key_id, CurveType, KeyPair, MasterCipher};
use tracing::{debug, info, warn};

use crate::blob::{RecordReader, RecordWriter};
use crate::error::StoreError;
use crate::recipient::{CanonicalRecipient, RecipientId};
use crate::store::{decode_loaded, SessionStore};
use crate::storage::RecordKey;

#[derive(Debug, Clone)]
pub struct LocalKeyRecord {
    recipient: RecipientId,
    current: Option<KeyPair>,
    next: Option<KeyPair>,
}

impl LocalKeyRecord {
    /// An empty record: no key pairs set yet.
    pub fn new(recipient: &impl CanonicalRecipient) -> Self {
        Self {
            recipient: recipient.recipient_id(),
            current: None,
            next: None,
        }
    }

    /// A record with a fresh current pair on `first_id` and a fresh next
    /// pair on the id after it.
    pub fn generate(recipient: &impl CanonicalRecipient, first_id: u32, curve: CurveType) -> Self {
        let current = KeyPair::generate(first_id, curve);
        let next = KeyPair::generate(next_key_id(current.id()), curve);
        Self {
            recipient: recipient.recipient_id(),
            current: Some(current),
            next: Some(next),
        }
    }

    /// Load the record, or an empty one if it is absent or unreadable.
    pub fn load(
        store: &SessionStore,
        master: &dyn MasterCipher,
        recipient: &impl CanonicalRecipient,
    ) -> Self {
        let recipient = recipient.recipient_id();
        debug!(%recipient, "loading local key record");
        store
            .load_record(&RecordKey::local(recipient), |payload| {
                Self::decode(recipient, master, payload)
            })
            .unwrap_or_else(|| Self::new(&recipient))
    }

    /// Load the record, reporting absence and corruption as errors.
    pub fn try_load(
        store: &SessionStore,
        master: &dyn MasterCipher,
        recipient: &impl CanonicalRecipient,
    ) -> Result<Self, StoreError> {
        let recipient = recipient.recipient_id();
        store.try_load_record(&RecordKey::local(recipient), |payload| {
            Self::decode(recipient, master, payload)
        })
    }

    pub fn has_record(store: &SessionStore, recipient: &impl CanonicalRecipient) -> bool {
        store.exists(&RecordKey::local(recipient.recipient_id()))
    }

    pub fn delete(store: &SessionStore, recipient: &impl CanonicalRecipient) -> Result<(), StoreError> {
        store.delete(&RecordKey::local(recipient.recipient_id()))
    }

    /// Load, advance and save as one step under the record's lock.
    ///
    /// Returns whether the key pairs advanced. Nothing is written when the
    /// acknowledgement does not match the next key.
    pub fn acknowledge(
        store: &SessionStore,
        master: &dyn MasterCipher,
        recipient: &impl CanonicalRecipient,
        acked_key_id: u32,
    ) -> Result<bool, StoreError> {
        let recipient = recipient.recipient_id();
        let key = RecordKey::local(recipient);
        store.with_record(&key, |storage| {
            let mut record = decode_loaded(&key, storage.read(&key), |payload| {
                Self::decode(recipient, master, payload)
            })
            .unwrap_or_else(|| Self::new(&recipient));

            if !record.advance_key_if_necessary(acked_key_id) {
                return Ok(false);
            }
            storage.write(&key, &record.encode(master)?)?;
            Ok(true)
        })
    }

    pub fn recipient(&self) -> RecipientId {
        self.recipient
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.next.is_none()
    }

    /// Promote the next pair if the remote party acknowledged it.
    ///
    /// Acknowledgements for any other id are stale or duplicated and are
    /// ignored. Returns whether the pairs advanced.
    pub fn advance_key_if_necessary(&mut self, acked_key_id: u32) -> bool {
        debug!(recipient = %self.recipient, acked_key_id, "remote client acknowledges key id");

        let next = match self.next.take() {
            Some(next) if next.id() == acked_key_id => next,
            other => {
                self.next = other;
                return false;
            }
        };

        let curve = match next.curve_type() {
            Ok(curve) => curve,
            Err(e) => {
                warn!(recipient = %self.recipient, "cannot advance local key: {}", e);
                self.next = Some(next);
                return false;
            }
        };

        let new_next = KeyPair::generate(next_key_id(next.id()), curve);
        info!(
            recipient = %self.recipient,
            current = next.id(),
            next = new_next.id(),
            "advanced local key pair"
        );
        self.current = Some(next);
        self.next = Some(new_next);
        true
    }

    pub fn set_current_key_pair(&mut self, key_pair: KeyPair) {
        self.current = Some(key_pair);
    }

    pub fn set_next_key_pair(&mut self, key_pair: KeyPair) {
        self.next = Some(key_pair);
    }

    pub fn current_key_pair(&self) -> Option<&KeyPair> {
        self.current.as_ref()
    }

    pub fn next_key_pair(&self) -> Option<&KeyPair> {
        self.next.as_ref()
    }

    pub fn key_pair_for_id(&self, id: u32) -> Result<&KeyPair, StoreError> {
        [self.current.as_ref(), self.next.as_ref()]
            .into_iter()
            .flatten()
            .find(|pair| pair.id() == id)
            .ok_or(StoreError::InvalidKeyId(id))
    }

    /// Seal current then next and write them durably.
    pub fn save(&self, store: &SessionStore, master: &dyn MasterCipher) -> Result<(), StoreError> {
        let payload = self.encode(master)?;
        store.write(&RecordKey::local(self.recipient), &payload)
    }

    fn encode(&self, master: &dyn MasterCipher) -> Result<Vec<u8>, StoreError> {
        let current = self
            .current
            .as_ref()
            .ok_or(StoreError::IncompleteRecord("current key pair"))?;
        let next = self
            .next
            .as_ref()
            .ok_or(StoreError::IncompleteRecord("next key pair"))?;

        let mut writer = RecordWriter::new(master);
        writer.write_blob(&current.serialize())?;
        writer.write_blob(&next.serialize())?;
        Ok(writer.finish())
    }

    fn decode(
        recipient: RecipientId,
        master: &dyn MasterCipher,
        payload: Vec<u8>,
    ) -> Result<Self, StoreError> {
        let mut reader = RecordReader::new(master, payload);
        let current = KeyPair::deserialize(&reader.read_blob()?).map_err(StoreError::from_key_error)?;
        let next = KeyPair::deserialize(&reader.read_blob()?).map_err(StoreError::from_key_error)?;
        reader.finish()?;
        Ok(Self {
            recipient,
            current: Some(current),
            next: Some(next),
        })
    }
}
