//! RatchetStore cryptographic primitives.
//!
//! This crate provides:
//! - Ratchet key pairs with a 24-bit wraparound id (Curve25519 via libsignal)
//! - Identity key serialization
//! - The master-secret cipher that seals every record at rest (AES-256-GCM)

pub mod error;
pub mod identity;
pub mod keypair;
pub mod master;

// Re-export key types for convenience
pub use error::CryptoError;
pub use identity::{generate_identity_key_pair, identity_key_from_bytes, identity_key_to_bytes};
pub use keypair::{next_key_id, CurveType, KeyPair, RatchetPublicKey, MEDIUM_MAX};
pub use libsignal_protocol::{IdentityKey, IdentityKeyPair, PrivateKey, PublicKey};
pub use master::{generate_salt, MasterCipher, MasterSecret};
