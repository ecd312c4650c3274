//! Storage abstraction for encrypted session records.
//!
//! Every record lives under a [`RecordKey`]: the recipient, the record
//! generation and (for V2 sessions) the device. Records only ever see
//! opaque sealed payloads; encryption happens above this layer.
//!
//! The trait is synchronous. Implementations must be `Send + Sync` so a
//! single store can be shared by worker threads.

mod file;
mod memory;

use std::fmt;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::error::StoreError;
use crate::recipient::{RecipientDevice, RecipientId};

/// Which record a key points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Local,
    Remote,
    SessionV1,
    SessionV2 { device_id: u32 },
}

/// Identity of one persisted record, and the unit of locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub recipient: RecipientId,
    pub kind: RecordKind,
}

impl RecordKey {
    pub fn local(recipient: RecipientId) -> Self {
        Self {
            recipient,
            kind: RecordKind::Local,
        }
    }

    pub fn remote(recipient: RecipientId) -> Self {
        Self {
            recipient,
            kind: RecordKind::Remote,
        }
    }

    pub fn session_v1(recipient: RecipientId) -> Self {
        Self {
            recipient,
            kind: RecordKind::SessionV1,
        }
    }

    pub fn session_v2(device: &RecipientDevice) -> Self {
        Self {
            recipient: device.recipient_id,
            kind: RecordKind::SessionV2 {
                device_id: device.device_id,
            },
        }
    }

    /// Deterministic file name: `<id>-local`, `<id>-remote`,
    /// `<id>-session` or `<id>.<device>-ratchet`.
    pub fn file_name(&self) -> String {
        match self.kind {
            RecordKind::Local => format!("{}-local", self.recipient),
            RecordKind::Remote => format!("{}-remote", self.recipient),
            RecordKind::SessionV1 => format!("{}-session", self.recipient),
            RecordKind::SessionV2 { device_id } => {
                format!("{}.{}-ratchet", self.recipient, device_id)
            }
        }
    }

    /// Inverse of [`RecordKey::file_name`]. Unrelated names yield `None`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (head, suffix) = name.split_once('-')?;
        match suffix {
            "local" => Some(Self::local(RecipientId(head.parse().ok()?))),
            "remote" => Some(Self::remote(RecipientId(head.parse().ok()?))),
            "session" => Some(Self::session_v1(RecipientId(head.parse().ok()?))),
            "ratchet" => {
                let (recipient, device) = head.split_once('.')?;
                let device = RecipientDevice::new(
                    RecipientId(recipient.parse().ok()?),
                    device.parse().ok()?,
                );
                Some(Self::session_v2(&device))
            }
            _ => None,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Backing store for sealed record payloads.
pub trait RecordStorage: Send + Sync + 'static {
    /// Check whether a record exists without reading it.
    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError>;

    /// Read a record's payload. `Ok(None)` means no record, which is not
    /// an error.
    fn read(&self, key: &RecordKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace a record's payload.
    ///
    /// Once this returns, the payload is durable and nothing of a
    /// previous, longer payload remains.
    fn write(&self, key: &RecordKey, payload: &[u8]) -> Result<(), StoreError>;

    /// Remove a record. Removing a missing record succeeds.
    fn delete(&self, key: &RecordKey) -> Result<(), StoreError>;

    /// All record keys stored for a recipient, across generations and devices.
    fn keys_for(&self, recipient: RecipientId) -> Result<Vec<RecordKey>, StoreError>;
}
