//! Ratchet key pairs tagged with a 24-bit id.
//!
//! Ids are a modular counter over [`MEDIUM_MAX`]: advancing past
//! `MEDIUM_MAX - 1` wraps to 0. Both the key pair and its public half
//! have a fixed binary layout, used for persistence and for embedding
//! in outgoing handshake messages.

use std::fmt;

use libsignal_protocol::{KeyPair as CurveKeyPair, PrivateKey, PublicKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Modulus of the key id counter (2^24).
pub const MEDIUM_MAX: u32 = 1 << 24;

const ID_LEN: usize = 3;

/// Serialized public key: curve type byte + 32 key bytes.
pub const PUBLIC_KEY_LEN: usize = 33;
pub const PRIVATE_KEY_LEN: usize = 32;

/// `[id(3)] [public key(33)]`
pub const RATCHET_PUBLIC_KEY_LEN: usize = ID_LEN + PUBLIC_KEY_LEN;

/// `[id(3)] [public key(33)] [private key(32)]`
pub const KEY_PAIR_LEN: usize = ID_LEN + PUBLIC_KEY_LEN + PRIVATE_KEY_LEN;

/// The id following `id` on the wraparound counter.
pub fn next_key_id(id: u32) -> u32 {
    (id % MEDIUM_MAX + 1) % MEDIUM_MAX
}

fn encode_id(id: u32) -> [u8; ID_LEN] {
    let be = (id % MEDIUM_MAX).to_be_bytes();
    [be[1], be[2], be[3]]
}

fn decode_id(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

/// Curve of a key, tagged by the first byte of its serialized public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveType {
    /// Curve25519.
    Djb,
}

impl CurveType {
    pub fn from_byte(byte: u8) -> Result<Self, CryptoError> {
        match byte {
            0x05 => Ok(CurveType::Djb),
            other => Err(CryptoError::InvalidKey(format!(
                "unknown curve type 0x{other:02x}"
            ))),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            CurveType::Djb => 0x05,
        }
    }

    fn of(public_key: &PublicKey) -> Result<Self, CryptoError> {
        let serialized = public_key.serialize();
        match serialized.first() {
            Some(byte) => Self::from_byte(*byte),
            None => Err(CryptoError::InvalidKey("empty public key".into())),
        }
    }

    /// Generate a fresh key pair on this curve.
    pub fn generate(self) -> CurveKeyPair {
        match self {
            CurveType::Djb => CurveKeyPair::generate(&mut OsRng),
        }
    }
}

fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    let curve = match bytes.first() {
        Some(byte) => CurveType::from_byte(*byte)?,
        None => return Err(CryptoError::InvalidKey("empty public key".into())),
    };
    PublicKey::deserialize(bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("{curve:?} public key: {e}")))
}

/// The public half of a ratchet key pair, as advertised to the remote party.
#[derive(Clone)]
pub struct RatchetPublicKey {
    id: u32,
    key: PublicKey,
}

impl RatchetPublicKey {
    pub fn new(id: u32, key: PublicKey) -> Self {
        Self {
            id: id % MEDIUM_MAX,
            key,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }

    pub fn curve_type(&self) -> Result<CurveType, CryptoError> {
        CurveType::of(&self.key)
    }

    /// Format: [id(3)] [public key(33)]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RATCHET_PUBLIC_KEY_LEN);
        buf.extend_from_slice(&encode_id(self.id));
        buf.extend_from_slice(&self.key.serialize());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() != RATCHET_PUBLIC_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "ratchet public key must be {RATCHET_PUBLIC_KEY_LEN} bytes, got {}",
                data.len()
            )));
        }
        let id = decode_id(&data[..ID_LEN]);
        let key = parse_public_key(&data[ID_LEN..])?;
        Ok(Self { id, key })
    }
}

impl PartialEq for RatchetPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.key.serialize() == other.key.serialize()
    }
}

impl Eq for RatchetPublicKey {}

impl fmt::Debug for RatchetPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatchetPublicKey")
            .field("id", &self.id)
            .field("curve", &self.curve_type().ok())
            .finish()
    }
}

/// A ratchet key pair with its id.
#[derive(Clone)]
pub struct KeyPair {
    id: u32,
    key_pair: CurveKeyPair,
}

impl KeyPair {
    /// Generate a fresh key pair. `id` is reduced modulo [`MEDIUM_MAX`].
    pub fn generate(id: u32, curve: CurveType) -> Self {
        Self {
            id: id % MEDIUM_MAX,
            key_pair: curve.generate(),
        }
    }

    pub fn from_parts(id: u32, key_pair: CurveKeyPair) -> Self {
        Self {
            id: id % MEDIUM_MAX,
            key_pair,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public_key
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.key_pair.private_key
    }

    pub fn curve_key_pair(&self) -> &CurveKeyPair {
        &self.key_pair
    }

    pub fn curve_type(&self) -> Result<CurveType, CryptoError> {
        CurveType::of(&self.key_pair.public_key)
    }

    pub fn ratchet_public_key(&self) -> RatchetPublicKey {
        RatchetPublicKey::new(self.id, self.key_pair.public_key.clone())
    }

    /// Format: [id(3)] [public key(33)] [private key(32)]
    pub fn serialize(&self) -> Zeroizing<Vec<u8>> {
        let mut buf = Zeroizing::new(Vec::with_capacity(KEY_PAIR_LEN));
        buf.extend_from_slice(&encode_id(self.id));
        buf.extend_from_slice(&self.key_pair.public_key.serialize());
        let private = Zeroizing::new(self.key_pair.private_key.serialize().to_vec());
        buf.extend_from_slice(&private);
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() != KEY_PAIR_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "key pair must be {KEY_PAIR_LEN} bytes, got {}",
                data.len()
            )));
        }
        let id = decode_id(&data[..ID_LEN]);
        let public = &data[ID_LEN..ID_LEN + PUBLIC_KEY_LEN];
        let private = &data[ID_LEN + PUBLIC_KEY_LEN..];

        // Reject unknown curves before handing the bytes to libsignal.
        parse_public_key(public)?;
        let key_pair = CurveKeyPair::from_public_and_private(public, private)?;
        Ok(Self { id, key_pair })
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.serialize() == other.serialize()
    }
}

impl Eq for KeyPair {}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("id", &self.id)
            .field("curve", &self.curve_type().ok())
            .finish_non_exhaustive()
    }
}
