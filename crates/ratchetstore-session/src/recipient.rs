//! Recipient identities used as storage keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Device id assumed when a recipient has a single device.
pub const DEFAULT_DEVICE_ID: u32 = 1;

/// Stable, opaque id of a correspondent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipientId(pub u64);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecipientId {
    fn from(id: u64) -> Self {
        RecipientId(id)
    }
}

/// Anything that resolves to a stable recipient id.
pub trait CanonicalRecipient {
    fn recipient_id(&self) -> RecipientId;
}

impl CanonicalRecipient for RecipientId {
    fn recipient_id(&self) -> RecipientId {
        *self
    }
}

/// One device of a recipient. V2 sessions are kept per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientDevice {
    pub recipient_id: RecipientId,
    pub device_id: u32,
}

impl RecipientDevice {
    pub fn new(recipient_id: impl Into<RecipientId>, device_id: u32) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            device_id,
        }
    }

    pub fn default_device(recipient: &impl CanonicalRecipient) -> Self {
        Self::new(recipient.recipient_id(), DEFAULT_DEVICE_ID)
    }
}

impl CanonicalRecipient for RecipientDevice {
    fn recipient_id(&self) -> RecipientId {
        self.recipient_id
    }
}

impl fmt::Display for RecipientDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.recipient_id, self.device_id)
    }
}
