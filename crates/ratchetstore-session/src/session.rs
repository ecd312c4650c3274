//! The entry point callers consult before composing or accepting a
//! message.
//!
//! [`Session`] decides which generation is active for a recipient and
//! answers capability queries across both. For identity and version
//! queries a V2 session always supersedes a legacy V1 session; for
//! encryption a complete V1 session stays usable while V2 is stale.

use std::fmt;

use ratchetstore_crypto::{IdentityKey, MasterCipher};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::local_key::LocalKeyRecord;
use crate::recipient::{CanonicalRecipient, RecipientDevice};
use crate::remote_key::RemoteKeyRecord;
use crate::session_v1::SessionRecordV1;
use crate::session_v2::{SessionRecordV2, CURRENT_SESSION_VERSION};
use crate::store::SessionStore;

/// Session state of one recipient device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    NoSession,
    V1Session,
    V2Session,
    /// A V2 session exists but must be renegotiated before encrypting.
    /// A complete V1 session may still be usable alongside it.
    V2SessionStale,
}

impl SessionStatus {
    pub fn can_encrypt(&self) -> bool {
        matches!(self, SessionStatus::V1Session | SessionStatus::V2Session)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::NoSession => "no session",
            SessionStatus::V1Session => "v1 session",
            SessionStatus::V2Session => "v2 session",
            SessionStatus::V2SessionStale => "v2 session (stale)",
        };
        f.write_str(name)
    }
}

/// The record backing whichever generation is active.
#[derive(Debug, Clone)]
pub enum SessionGeneration {
    V1(SessionRecordV1),
    V2(SessionRecordV2),
}

impl SessionGeneration {
    pub fn remote_identity_key(&self) -> Option<IdentityKey> {
        match self {
            SessionGeneration::V1(record) => record.identity_key().copied(),
            SessionGeneration::V2(record) => record.session_state().remote_identity_key(),
        }
    }

    pub fn session_version(&self) -> u32 {
        match self {
            SessionGeneration::V1(record) => record.session_version(),
            SessionGeneration::V2(_) => CURRENT_SESSION_VERSION,
        }
    }
}

/// Capability queries and teardown over both session generations.
///
/// Queries never fail: unreadable records count as absent.
pub struct Session<'a> {
    store: &'a SessionStore,
    master: &'a dyn MasterCipher,
}

impl<'a> Session<'a> {
    pub fn new(store: &'a SessionStore, master: &'a dyn MasterCipher) -> Self {
        Self { store, master }
    }

    /// Whether any session exists: a complete V1 triple, or a V2 session
    /// on the default device.
    pub fn has_session(&self, recipient: &impl CanonicalRecipient) -> bool {
        self.has_v1_session(recipient)
            || self.established_v2(&RecipientDevice::default_device(recipient)).is_some()
    }

    pub fn has_encrypt_capable_session(&self, recipient: &impl CanonicalRecipient) -> bool {
        self.has_encrypt_capable_session_for_device(&RecipientDevice::default_device(recipient))
    }

    /// A complete V1 triple, or a V2 session on `device` that is not stale.
    ///
    /// A stale V2 session does not hide a usable V1 session.
    pub fn has_encrypt_capable_session_for_device(&self, device: &RecipientDevice) -> bool {
        self.has_v1_session(device) || self.status(device) == SessionStatus::V2Session
    }

    pub fn has_remote_identity_key(&self, recipient: &impl CanonicalRecipient) -> bool {
        if self.established_v2(&RecipientDevice::default_device(recipient)).is_some() {
            return true;
        }
        self.has_v1_session(recipient)
            && SessionRecordV1::load(self.store, self.master, recipient)
                .identity_key()
                .is_some()
    }

    pub fn remote_identity_key(&self, recipient: &impl CanonicalRecipient) -> Option<IdentityKey> {
        self.active_generation(recipient)?.remote_identity_key()
    }

    /// 2 with a V2 session, the negotiated version with a V1 session,
    /// otherwise 0.
    pub fn session_version(&self, recipient: &impl CanonicalRecipient) -> u32 {
        self.active_generation(recipient)
            .map(|generation| generation.session_version())
            .unwrap_or(0)
    }

    /// The V2 record of the default device if it has a session, else the
    /// V1 record if one exists.
    pub fn active_generation(&self, recipient: &impl CanonicalRecipient) -> Option<SessionGeneration> {
        if let Some(record) = self.established_v2(&RecipientDevice::default_device(recipient)) {
            return Some(SessionGeneration::V2(record));
        }
        if SessionRecordV1::has_session(self.store, recipient) {
            return Some(SessionGeneration::V1(SessionRecordV1::load(
                self.store,
                self.master,
                recipient,
            )));
        }
        None
    }

    pub fn status(&self, device: &RecipientDevice) -> SessionStatus {
        if let Some(record) = self.established_v2(device) {
            return if record.is_stale(self.store.refresh_policy()) {
                SessionStatus::V2SessionStale
            } else {
                SessionStatus::V2Session
            };
        }
        if self.has_v1_session(device) {
            SessionStatus::V1Session
        } else {
            SessionStatus::NoSession
        }
    }

    /// Delete the local key, remote key and V1 session records.
    pub fn clear_v1_session_for(&self, recipient: &impl CanonicalRecipient) -> Result<(), StoreError> {
        LocalKeyRecord::delete(self.store, recipient)?;
        RemoteKeyRecord::delete(self.store, recipient)?;
        SessionRecordV1::delete(self.store, recipient)?;
        info!(recipient = %recipient.recipient_id(), "cleared V1 session");
        Ok(())
    }

    /// Delete every record of `recipient` across both generations and all
    /// devices.
    pub fn abort_session_for(&self, recipient: &impl CanonicalRecipient) -> Result<(), StoreError> {
        self.clear_v1_session_for(recipient)?;
        SessionRecordV2::delete_all(self.store, recipient)?;
        info!(recipient = %recipient.recipient_id(), "aborted session");
        Ok(())
    }

    /// A V1 session is only usable when all three records exist.
    fn has_v1_session(&self, recipient: &impl CanonicalRecipient) -> bool {
        if !SessionRecordV1::has_session(self.store, recipient) {
            return false;
        }
        let complete = LocalKeyRecord::has_record(self.store, recipient)
            && RemoteKeyRecord::has_record(self.store, recipient);
        if !complete {
            debug!(recipient = %recipient.recipient_id(), "V1 session without key records");
        }
        complete
    }

    fn established_v2(&self, device: &RecipientDevice) -> Option<SessionRecordV2> {
        if !SessionRecordV2::has_record(self.store, device) {
            return None;
        }
        Some(SessionRecordV2::load(self.store, self.master, device)).filter(SessionRecordV2::is_established)
    }
}

impl fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("store", self.store).finish_non_exhaustive()
    }
}
