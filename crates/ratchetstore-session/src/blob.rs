//! Sealed field codec shared by all records.
//!
//! A record payload is a sequence of fields, each sealed separately under
//! the master cipher and written as `[length: u32 BE] [sealed blob]`.
//! There is no framing beyond that.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ratchetstore_crypto::MasterCipher;
use zeroize::Zeroizing;

use crate::error::StoreError;

/// Upper bound on one sealed field. Anything larger is treated as corruption.
pub const MAX_BLOB_LEN: usize = 1 << 20;

const LEN_PREFIX: usize = 4;

pub struct RecordWriter<'a> {
    cipher: &'a dyn MasterCipher,
    buf: BytesMut,
}

impl<'a> RecordWriter<'a> {
    pub fn new(cipher: &'a dyn MasterCipher) -> Self {
        Self {
            cipher,
            buf: BytesMut::new(),
        }
    }

    /// Seal `plaintext` and append it as the next field.
    pub fn write_blob(&mut self, plaintext: &[u8]) -> Result<(), StoreError> {
        let sealed = self.cipher.encrypt(plaintext)?;
        if sealed.len() > MAX_BLOB_LEN {
            return Err(StoreError::Corrupted(format!(
                "field of {} bytes exceeds {MAX_BLOB_LEN}",
                sealed.len()
            )));
        }
        self.buf.reserve(LEN_PREFIX + sealed.len());
        self.buf.put_u32(sealed.len() as u32);
        self.buf.put_slice(&sealed);
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

pub struct RecordReader<'a> {
    cipher: &'a dyn MasterCipher,
    buf: Bytes,
}

impl<'a> RecordReader<'a> {
    pub fn new(cipher: &'a dyn MasterCipher, payload: Vec<u8>) -> Self {
        Self {
            cipher,
            buf: Bytes::from(payload),
        }
    }

    /// Read and open the next field.
    pub fn read_blob(&mut self) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        if self.buf.remaining() < LEN_PREFIX {
            return Err(StoreError::Corrupted("truncated field length".into()));
        }
        let len = self.buf.get_u32() as usize;
        if len > MAX_BLOB_LEN {
            return Err(StoreError::Corrupted(format!(
                "field length {len} exceeds {MAX_BLOB_LEN}"
            )));
        }
        if self.buf.remaining() < len {
            return Err(StoreError::Corrupted(format!(
                "field truncated: expected {len} bytes, got {}",
                self.buf.remaining()
            )));
        }
        let sealed = self.buf.split_to(len);
        Ok(self.cipher.decrypt(&sealed)?)
    }

    /// Fail if anything follows the last expected field.
    pub fn finish(self) -> Result<(), StoreError> {
        if self.buf.has_remaining() {
            return Err(StoreError::Corrupted(format!(
                "{} trailing bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}
