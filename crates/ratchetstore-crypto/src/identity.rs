//! Long-term identity keys bound to session records.
//!
//! Both session generations store the remote party's identity key so
//! trust checks can compare it with the key the user verified. Records
//! keep it as libsignal's serialized form.

use libsignal_protocol::{IdentityKey, IdentityKeyPair};
use rand::rngs::OsRng;

use crate::error::CryptoError;

/// A fresh identity key pair drawn from the OS RNG.
pub fn generate_identity_key_pair() -> IdentityKeyPair {
    IdentityKeyPair::generate(&mut OsRng)
}

/// The stored form of `key`: curve type byte followed by the public key.
pub fn identity_key_to_bytes(key: &IdentityKey) -> Vec<u8> {
    Vec::from(key.serialize())
}

/// Parse a stored identity key. Unknown curves and bad lengths are
/// [`CryptoError::InvalidKey`].
pub fn identity_key_from_bytes(bytes: &[u8]) -> Result<IdentityKey, CryptoError> {
    IdentityKey::decode(bytes).map_err(|e| CryptoError::InvalidKey(format!("identity key: {e}")))
}
