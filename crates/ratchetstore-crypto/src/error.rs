use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("decryption failed: wrong master secret or corrupted data")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("RNG failed")]
    Rng,

    #[error("unsupported ciphertext version: 0x{0:02x}")]
    UnsupportedVersion(u8),
}

impl From<libsignal_protocol::SignalProtocolError> for CryptoError {
    fn from(err: libsignal_protocol::SignalProtocolError) -> Self {
        CryptoError::InvalidKey(err.to_string())
    }
}
