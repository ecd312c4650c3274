//! Legacy (V1) session record: the outcome of a completed key exchange.
//!
//! On its own this record only proves that a handshake finished. A V1
//! session is usable when the local and remote key records exist too;
//! that check belongs to the facade in [`crate::session`].

use ratchetstore_crypto::{identity_key_from_bytes, identity_key_to_bytes, IdentityKey, MasterCipher};
use tracing::debug;

use crate::blob::{RecordReader, RecordWriter};
use crate::error::StoreError;
use crate::recipient::{CanonicalRecipient, RecipientId};
use crate::store::SessionStore;
use crate::storage::RecordKey;

#[derive(Debug, Clone)]
pub struct SessionRecordV1 {
    recipient: RecipientId,
    identity_key: Option<IdentityKey>,
    session_version: u32,
}

impl SessionRecordV1 {
    pub fn new(recipient: &impl CanonicalRecipient) -> Self {
        Self {
            recipient: recipient.recipient_id(),
            identity_key: None,
            session_version: 0,
        }
    }

    /// Load the record, or an empty one if it is absent or unreadable.
    pub fn load(
        store: &SessionStore,
        master: &dyn MasterCipher,
        recipient: &impl CanonicalRecipient,
    ) -> Self {
        let recipient = recipient.recipient_id();
        debug!(%recipient, "loading V1 session record");
        store
            .load_record(&RecordKey::session_v1(recipient), |payload| {
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
        store.try_load_record(&RecordKey::session_v1(recipient), |payload| {
            Self::decode(recipient, master, payload)
        })
    }

    /// Whether this record's own backing entry exists.
    pub fn has_session(store: &SessionStore, recipient: &impl CanonicalRecipient) -> bool {
        store.exists(&RecordKey::session_v1(recipient.recipient_id()))
    }

    pub fn delete(store: &SessionStore, recipient: &impl CanonicalRecipient) -> Result<(), StoreError> {
        store.delete(&RecordKey::session_v1(recipient.recipient_id()))
    }

    pub fn recipient(&self) -> RecipientId {
        self.recipient
    }

    pub fn identity_key(&self) -> Option<&IdentityKey> {
        self.identity_key.as_ref()
    }

    pub fn set_identity_key(&mut self, identity_key: IdentityKey) {
        self.identity_key = Some(identity_key);
    }

    pub fn session_version(&self) -> u32 {
        self.session_version
    }

    pub fn set_session_version(&mut self, version: u32) {
        self.session_version = version;
    }

    /// Fields: [session version (u32 BE)] [identity key, empty when unset]
    pub fn save(&self, store: &SessionStore, master: &dyn MasterCipher) -> Result<(), StoreError> {
        let identity = self
            .identity_key
            .as_ref()
            .map(identity_key_to_bytes)
            .unwrap_or_default();

        let mut writer = RecordWriter::new(master);
        writer.write_blob(&self.session_version.to_be_bytes())?;
        writer.write_blob(&identity)?;
        store.write(&RecordKey::session_v1(self.recipient), &writer.finish())
    }

    fn decode(
        recipient: RecipientId,
        master: &dyn MasterCipher,
        payload: Vec<u8>,
    ) -> Result<Self, StoreError> {
        let mut reader = RecordReader::new(master, payload);

        let version_bytes = reader.read_blob()?;
        let session_version = <[u8; 4]>::try_from(version_bytes.as_slice())
            .map(u32::from_be_bytes)
            .map_err(|_| {
                StoreError::Corrupted(format!("session version is {} bytes", version_bytes.len()))
            })?;

        let identity_bytes = reader.read_blob()?;
        let identity_key = if identity_bytes.is_empty() {
            None
        } else {
            Some(identity_key_from_bytes(&identity_bytes).map_err(StoreError::from_key_error)?)
        };

        reader.finish()?;
        Ok(Self {
            recipient,
            identity_key,
            session_version,
        })
    }
}
