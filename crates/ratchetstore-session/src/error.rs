use ratchetstore_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("no key for id: {0}")]
    InvalidKeyId(u32),

    #[error("record is missing its {0}")]
    IncompleteRecord(&'static str),

    #[error("corrupted record: {0}")]
    Corrupted(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl StoreError {
    /// Map key-parse failures onto [`StoreError::InvalidKey`] so callers
    /// can match on one variant regardless of which layer rejected the key.
    pub(crate) fn from_key_error(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKey(msg) => StoreError::InvalidKey(msg),
            other => StoreError::Crypto(other),
        }
    }
}
