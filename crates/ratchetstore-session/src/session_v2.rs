//! Ratcheting (V2) session records, one per recipient device.
//!
//! A record holds the current [`SessionState`] plus an archive of
//! previous states, so that messages encrypted under a session that was
//! since replaced by a new handshake can still be matched. The whole
//! structure is serialized with postcard and sealed as a single field.
//!
//! Devices of the same recipient are fully independent: each has its own
//! record, lock and staleness.

use std::collections::VecDeque;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use ratchetstore_crypto::{
    identity_key_from_bytes, identity_key_to_bytes, IdentityKey, KeyPair, MasterCipher, PublicKey,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::blob::{RecordReader, RecordWriter};
use crate::config::RefreshPolicy;
use crate::error::StoreError;
use crate::recipient::{CanonicalRecipient, RecipientDevice, RecipientId};
use crate::store::SessionStore;
use crate::storage::{RecordKey, RecordKind};

/// Protocol version reported for any V2 session.
pub const CURRENT_SESSION_VERSION: u32 = 2;

/// Oldest archived states are dropped past this many.
pub const ARCHIVED_STATES_MAX_LENGTH: usize = 40;

/// Oldest receiver chains are dropped past this many.
pub const MAX_RECEIVER_CHAINS: usize = 5;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A symmetric chain key and its position in the chain.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChainKey {
    index: u32,
    key: Zeroizing<Vec<u8>>,
}

impl ChainKey {
    pub fn new(index: u32, key: &[u8]) -> Self {
        Self {
            index,
            key: Zeroizing::new(key.to_vec()),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainKey")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct SenderChain {
    /// Serialized [`KeyPair`].
    ratchet_key_pair: Zeroizing<Vec<u8>>,
    chain_key: ChainKey,
}

#[derive(Clone, Serialize, Deserialize)]
struct ReceiverChain {
    /// Serialized [`PublicKey`].
    ratchet_key: Vec<u8>,
    chain_key: ChainKey,
}

/// Ratchet state of one session with one device.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionState {
    session_version: u32,
    local_identity_key: Option<Vec<u8>>,
    remote_identity_key: Option<Vec<u8>>,
    root_key: Zeroizing<Vec<u8>>,
    sender_chain: Option<SenderChain>,
    receiver_chains: VecDeque<ReceiverChain>,
    previous_counter: u32,
    local_registration_id: u32,
    remote_registration_id: u32,
    alice_base_key: Option<Vec<u8>>,
    needs_refresh: bool,
    created_at: u64,
    messages_encrypted: u32,
}

impl SessionState {
    /// An empty state created now.
    pub fn new() -> Self {
        Self {
            session_version: CURRENT_SESSION_VERSION,
            local_identity_key: None,
            remote_identity_key: None,
            root_key: Zeroizing::new(Vec::new()),
            sender_chain: None,
            receiver_chains: VecDeque::new(),
            previous_counter: 0,
            local_registration_id: 0,
            remote_registration_id: 0,
            alice_base_key: None,
            needs_refresh: false,
            created_at: now_secs(),
            messages_encrypted: 0,
        }
    }

    pub fn session_version(&self) -> u32 {
        self.session_version
    }

    pub fn set_session_version(&mut self, version: u32) {
        self.session_version = version;
    }

    pub fn local_identity_key(&self) -> Option<IdentityKey> {
        decode_identity(self.local_identity_key.as_deref(), "local")
    }

    pub fn set_local_identity_key(&mut self, key: &IdentityKey) {
        self.local_identity_key = Some(identity_key_to_bytes(key));
    }

    /// The identity this ratchet is bound to, for trust verification.
    pub fn remote_identity_key(&self) -> Option<IdentityKey> {
        decode_identity(self.remote_identity_key.as_deref(), "remote")
    }

    pub fn set_remote_identity_key(&mut self, key: &IdentityKey) {
        self.remote_identity_key = Some(identity_key_to_bytes(key));
    }

    pub fn root_key(&self) -> &[u8] {
        &self.root_key
    }

    pub fn set_root_key(&mut self, root_key: &[u8]) {
        self.root_key = Zeroizing::new(root_key.to_vec());
    }

    pub fn has_sender_chain(&self) -> bool {
        self.sender_chain.is_some()
    }

    pub fn set_sender_chain(&mut self, ratchet_key_pair: &KeyPair, chain_key: ChainKey) {
        self.sender_chain = Some(SenderChain {
            ratchet_key_pair: ratchet_key_pair.serialize(),
            chain_key,
        });
    }

    pub fn sender_ratchet_key_pair(&self) -> Option<KeyPair> {
        let chain = self.sender_chain.as_ref()?;
        match KeyPair::deserialize(&chain.ratchet_key_pair) {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!("unreadable sender ratchet key: {}", e);
                None
            }
        }
    }

    pub fn sender_chain_key(&self) -> Option<&ChainKey> {
        self.sender_chain.as_ref().map(|chain| &chain.chain_key)
    }

    /// Replace the sender chain key. Returns false without a sender chain.
    pub fn set_sender_chain_key(&mut self, chain_key: ChainKey) -> bool {
        match self.sender_chain.as_mut() {
            Some(chain) => {
                chain.chain_key = chain_key;
                true
            }
            None => false,
        }
    }

    /// Add a receiver chain for a new remote ratchet key, dropping the
    /// oldest chain past [`MAX_RECEIVER_CHAINS`].
    pub fn add_receiver_chain(&mut self, ratchet_key: &PublicKey, chain_key: ChainKey) {
        self.receiver_chains.push_back(ReceiverChain {
            ratchet_key: ratchet_key.serialize().to_vec(),
            chain_key,
        });
        while self.receiver_chains.len() > MAX_RECEIVER_CHAINS {
            self.receiver_chains.pop_front();
        }
    }

    pub fn has_receiver_chain(&self, ratchet_key: &PublicKey) -> bool {
        self.receiver_chain_key(ratchet_key).is_some()
    }

    pub fn receiver_chain_key(&self, ratchet_key: &PublicKey) -> Option<&ChainKey> {
        let wanted = ratchet_key.serialize();
        self.receiver_chains
            .iter()
            .find(|chain| chain.ratchet_key[..] == wanted[..])
            .map(|chain| &chain.chain_key)
    }

    /// Replace the chain key of an existing receiver chain. Returns false
    /// if there is no chain for `ratchet_key`.
    pub fn set_receiver_chain_key(&mut self, ratchet_key: &PublicKey, chain_key: ChainKey) -> bool {
        let wanted = ratchet_key.serialize();
        match self
            .receiver_chains
            .iter_mut()
            .find(|chain| chain.ratchet_key[..] == wanted[..])
        {
            Some(chain) => {
                chain.chain_key = chain_key;
                true
            }
            None => false,
        }
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn set_previous_counter(&mut self, counter: u32) {
        self.previous_counter = counter;
    }

    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub fn set_local_registration_id(&mut self, id: u32) {
        self.local_registration_id = id;
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub fn set_remote_registration_id(&mut self, id: u32) {
        self.remote_registration_id = id;
    }

    pub fn alice_base_key(&self) -> Option<&[u8]> {
        self.alice_base_key.as_deref()
    }

    pub fn set_alice_base_key(&mut self, base_key: &[u8]) {
        self.alice_base_key = Some(base_key.to_vec());
    }

    pub fn set_needs_refresh(&mut self, needs_refresh: bool) {
        self.needs_refresh = needs_refresh;
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn set_created_at(&mut self, unix_secs: u64) {
        self.created_at = unix_secs;
    }

    pub fn messages_encrypted(&self) -> u32 {
        self.messages_encrypted
    }

    /// Count one outgoing message against the refresh policy.
    pub fn record_message_encrypted(&mut self) {
        self.messages_encrypted = self.messages_encrypted.saturating_add(1);
    }

    /// Whether this state must be renegotiated before encrypting again.
    pub fn is_stale(&self, policy: &RefreshPolicy, now_unix_secs: u64) -> bool {
        if self.needs_refresh {
            return true;
        }
        if policy.max_messages > 0 && self.messages_encrypted >= policy.max_messages {
            return true;
        }
        policy.max_age_secs > 0 && now_unix_secs.saturating_sub(self.created_at) >= policy.max_age_secs
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("session_version", &self.session_version)
            .field("has_sender_chain", &self.has_sender_chain())
            .field("receiver_chains", &self.receiver_chains.len())
            .field("needs_refresh", &self.needs_refresh)
            .field("created_at", &self.created_at)
            .field("messages_encrypted", &self.messages_encrypted)
            .finish_non_exhaustive()
    }
}

fn decode_identity(bytes: Option<&[u8]>, which: &str) -> Option<IdentityKey> {
    match identity_key_from_bytes(bytes?) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("unreadable {} identity key in session state: {}", which, e);
            None
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SessionStructure {
    current: SessionState,
    previous: VecDeque<SessionState>,
}

#[derive(Debug, Clone)]
pub struct SessionRecordV2 {
    device: RecipientDevice,
    state: SessionState,
    previous_states: VecDeque<SessionState>,
    fresh: bool,
}

impl SessionRecordV2 {
    /// A fresh record with an empty state.
    pub fn new(device: RecipientDevice) -> Self {
        Self {
            device,
            state: SessionState::new(),
            previous_states: VecDeque::new(),
            fresh: true,
        }
    }

    /// Load the record, or a fresh one if it is absent or unreadable.
    pub fn load(store: &SessionStore, master: &dyn MasterCipher, device: &RecipientDevice) -> Self {
        debug!(%device, "loading V2 session record");
        store
            .load_record(&RecordKey::session_v2(device), |payload| {
                Self::decode(*device, master, payload)
            })
            .unwrap_or_else(|| Self::new(*device))
    }

    pub fn try_load(
        store: &SessionStore,
        master: &dyn MasterCipher,
        device: &RecipientDevice,
    ) -> Result<Self, StoreError> {
        store.try_load_record(&RecordKey::session_v2(device), |payload| {
            Self::decode(*device, master, payload)
        })
    }

    /// Whether the device's backing entry exists, readable or not.
    pub fn has_record(store: &SessionStore, device: &RecipientDevice) -> bool {
        store.exists(&RecordKey::session_v2(device))
    }

    /// Whether `device` has an established session: the record exists,
    /// can be opened, and its current state has a sender chain.
    pub fn has_session(store: &SessionStore, master: &dyn MasterCipher, device: &RecipientDevice) -> bool {
        Self::has_record(store, device)
            && Self::load(store, master, device).is_established()
    }

    /// Whether the device's session must be renegotiated before use. An
    /// absent session is not stale.
    pub fn needs_refresh(store: &SessionStore, master: &dyn MasterCipher, device: &RecipientDevice) -> bool {
        let record = Self::load(store, master, device);
        record.is_established() && record.is_stale(store.refresh_policy())
    }

    pub fn delete(store: &SessionStore, device: &RecipientDevice) -> Result<(), StoreError> {
        store.delete(&RecordKey::session_v2(device))
    }

    /// Remove every device's record for `recipient`.
    pub fn delete_all(store: &SessionStore, recipient: &impl CanonicalRecipient) -> Result<(), StoreError> {
        let recipient = recipient.recipient_id();
        for device_id in Self::devices_for(store, &recipient)? {
            Self::delete(store, &RecipientDevice::new(recipient, device_id))?;
        }
        info!(%recipient, "deleted all V2 sessions");
        Ok(())
    }

    /// Device ids that have a V2 record for `recipient`.
    pub fn devices_for(store: &SessionStore, recipient: &impl CanonicalRecipient) -> Result<Vec<u32>, StoreError> {
        let mut devices: Vec<u32> = store
            .keys_for(recipient.recipient_id())?
            .into_iter()
            .filter_map(|key| match key.kind {
                RecordKind::SessionV2 { device_id } => Some(device_id),
                _ => None,
            })
            .collect();
        devices.sort_unstable();
        Ok(devices)
    }

    pub fn device(&self) -> RecipientDevice {
        self.device
    }

    pub fn recipient(&self) -> RecipientId {
        self.device.recipient_id
    }

    /// True until a state has been loaded or promoted into this record.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn is_established(&self) -> bool {
        self.state.has_sender_chain()
    }

    pub fn is_stale(&self, policy: &RefreshPolicy) -> bool {
        self.state.is_stale(policy, now_secs())
    }

    pub fn session_state(&self) -> &SessionState {
        &self.state
    }

    pub fn session_state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn previous_session_states(&self) -> impl Iterator<Item = &SessionState> {
        self.previous_states.iter()
    }

    /// Whether the current or an archived state was set up by the
    /// handshake identified by `version` and `alice_base_key`.
    pub fn has_session_state(&self, version: u32, alice_base_key: &[u8]) -> bool {
        std::iter::once(&self.state)
            .chain(self.previous_states.iter())
            .any(|state| {
                state.session_version() == version && state.alice_base_key() == Some(alice_base_key)
            })
    }

    /// Move the current state into the archive and start an empty one.
    pub fn archive_current_state(&mut self) {
        self.promote_state(SessionState::new());
    }

    /// Make `state` current, archiving the previous current state.
    pub fn promote_state(&mut self, state: SessionState) {
        let old = std::mem::replace(&mut self.state, state);
        self.previous_states.push_front(old);
        self.previous_states.truncate(ARCHIVED_STATES_MAX_LENGTH);
        self.fresh = false;
    }

    pub fn save(&self, store: &SessionStore, master: &dyn MasterCipher) -> Result<(), StoreError> {
        let structure = SessionStructure {
            current: self.state.clone(),
            previous: self.previous_states.clone(),
        };
        let plaintext = Zeroizing::new(postcard::to_allocvec(&structure)?);

        let mut writer = RecordWriter::new(master);
        writer.write_blob(&plaintext)?;
        store.write(&RecordKey::session_v2(&self.device), &writer.finish())
    }

    fn decode(
        device: RecipientDevice,
        master: &dyn MasterCipher,
        payload: Vec<u8>,
    ) -> Result<Self, StoreError> {
        let mut reader = RecordReader::new(master, payload);
        let plaintext = reader.read_blob()?;
        reader.finish()?;

        let structure: SessionStructure = postcard::from_bytes(&plaintext)?;
        Ok(Self {
            device,
            state: structure.current,
            previous_states: structure.previous,
            fresh: false,
        })
    }
}
