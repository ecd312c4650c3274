//! Master-secret encryption for records at rest.
//!
//! PBKDF2 + AES-256-GCM sealing: every field a record writes
//! to disk is sealed under the user's unlocked master secret. Custody of
//! the secret (lock/unlock, passphrase entry) lives outside this crate;
//! records only ever borrow a [`MasterCipher`] for the duration of one
//! load or save.

use std::fmt;
use std::num::NonZeroU32;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::CryptoError;

const MAGIC: &[u8; 4] = b"RSMS"; // "RatchetStore Master Secret"
const VERSION: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

/// Length of the PBKDF2 salt.
pub const SALT_LEN: usize = 32;

/// Length of the raw AES-256 key.
pub const KEY_LEN: usize = 32;

/// Ciphertext expansion of one [`MasterCipher::encrypt`] call.
pub const CIPHERTEXT_OVERHEAD: usize = HEADER_LEN + TAG_LEN;

pub const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(600_000) {
    Some(n) => n,
    None => panic!("iteration count must be non-zero"),
};

/// Symmetric encrypt/decrypt capability bound to an unlocked master secret.
pub trait MasterCipher: Send + Sync {
    /// Seal `plaintext`. Every call uses a fresh random nonce.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Open a blob produced by [`MasterCipher::encrypt`].
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}

/// An unlocked master secret: a 256-bit AES-GCM key wiped on drop.
pub struct MasterSecret {
    key_bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl MasterSecret {
    pub fn from_key_bytes(key_bytes: [u8; KEY_LEN]) -> Self {
        Self {
            key_bytes: Zeroizing::new(key_bytes),
        }
    }

    /// Derive the master secret from a passphrase and salt.
    pub fn from_passphrase(passphrase: &str, salt: &[u8; SALT_LEN]) -> Self {
        Self::from_passphrase_with_iterations(passphrase, salt, PBKDF2_ITERATIONS)
    }

    pub fn from_passphrase_with_iterations(
        passphrase: &str,
        salt: &[u8; SALT_LEN],
        iterations: NonZeroU32,
    ) -> Self {
        let mut key_bytes = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            passphrase.as_bytes(),
            &mut key_bytes[..],
        );
        debug!(iterations = iterations.get(), "derived master secret from passphrase");
        Self { key_bytes }
    }

    /// Generate a fresh random master secret.
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let mut key_bytes = Zeroizing::new([0u8; KEY_LEN]);
        rng.fill(&mut key_bytes[..]).map_err(|_| CryptoError::Rng)?;
        Ok(Self { key_bytes })
    }

    fn aead_key(&self) -> Result<LessSafeKey, CryptoError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key_bytes[..])
            .map_err(|_| CryptoError::InvalidKey("master secret has wrong length".into()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSecret").finish_non_exhaustive()
    }
}

fn aad_bytes() -> [u8; 5] {
    let mut aad = [0u8; 5];
    aad[..4].copy_from_slice(MAGIC);
    aad[4] = VERSION;
    aad
}

impl MasterCipher for MasterSecret {
    /// Output format: [version(1)] [nonce(12)] [ciphertext + tag(16)]
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes).map_err(|_| CryptoError::Rng)?;

        let key = self.aead_key()?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        let aad = aad_bytes();

        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(nonce, Aad::from(&aad), &mut in_out)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(HEADER_LEN + in_out.len());
        out.push(VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if ciphertext.len() < CIPHERTEXT_OVERHEAD {
            return Err(CryptoError::DecryptionFailed);
        }
        if ciphertext[0] != VERSION {
            return Err(CryptoError::UnsupportedVersion(ciphertext[0]));
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&ciphertext[1..HEADER_LEN]);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let key = self.aead_key()?;
        let aad = aad_bytes();

        let mut in_out = Zeroizing::new(ciphertext[HEADER_LEN..].to_vec());
        let plaintext_len = key
            .open_in_place(nonce, Aad::from(&aad), in_out.as_mut_slice())
            .map_err(|_| CryptoError::DecryptionFailed)?
            .len();
        in_out.truncate(plaintext_len);

        Ok(in_out)
    }
}

/// Generate a fresh random PBKDF2 salt.
pub fn generate_salt() -> Result<[u8; SALT_LEN], CryptoError> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt).map_err(|_| CryptoError::Rng)?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_iterations() -> NonZeroU32 {
        NonZeroU32::new(1_000).unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let secret = MasterSecret::generate().unwrap();
        let plaintext = b"local key record";

        let sealed = secret.encrypt(plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + CIPHERTEXT_OVERHEAD);
        assert_ne!(&sealed[HEADER_LEN..HEADER_LEN + plaintext.len()], plaintext);

        let opened = secret.decrypt(&sealed).unwrap();
        assert_eq!(opened.as_slice(), plaintext);
    }

    #[test]
    fn nonces_are_fresh() {
        let secret = MasterSecret::generate().unwrap();
        let a = secret.encrypt(b"same").unwrap();
        let b = secret.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_secret_fails() {
        let a = MasterSecret::generate().unwrap();
        let b = MasterSecret::generate().unwrap();
        let sealed = a.encrypt(b"secret").unwrap();
        assert!(matches!(b.decrypt(&sealed), Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn tampered_data_fails() {
        let secret = MasterSecret::generate().unwrap();
        let mut sealed = secret.encrypt(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(secret.decrypt(&sealed).is_err());
    }

    #[test]
    fn short_and_unknown_version_rejected() {
        let secret = MasterSecret::generate().unwrap();
        assert!(matches!(
            secret.decrypt(&[VERSION; 4]),
            Err(CryptoError::DecryptionFailed)
        ));

        let mut sealed = secret.encrypt(b"secret").unwrap();
        sealed[0] = 0x7F;
        assert!(matches!(
            secret.decrypt(&sealed),
            Err(CryptoError::UnsupportedVersion(0x7F))
        ));
    }

    #[test]
    fn passphrase_derivation_is_deterministic() {
        let salt = generate_salt().unwrap();
        let a = MasterSecret::from_passphrase_with_iterations("hunter2", &salt, fast_iterations());
        let b = MasterSecret::from_passphrase_with_iterations("hunter2", &salt, fast_iterations());
        let sealed = a.encrypt(b"payload").unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap().as_slice(), b"payload");

        let other = MasterSecret::from_passphrase_with_iterations("hunter3", &salt, fast_iterations());
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn debug_does_not_leak_key() {
        let secret = MasterSecret::from_key_bytes([0xAB; KEY_LEN]);
        assert_eq!(format!("{secret:?}"), "MasterSecret { .. }");
    }
}
