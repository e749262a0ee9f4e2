//! Versioned binary container for payloads sealed under a DEK.
//!
//! Layout (big-endian lengths):
//!
//! ```text
//! version:u8 | keyIdHash:u32 | nonceLen:u8 | nonce | aadLen:u16 | aad | ctLen:u32 | ciphertext
//! ```

use thiserror::Error;

/// The only envelope version this crate reads or writes.
pub const ENVELOPE_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: u8,
    /// Identifies the DEK generation that sealed the payload.
    pub key_id_hash: u32,
    pub nonce: Vec<u8>,
    pub aad: Vec<u8>,
    /// AEAD output, tag included.
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("unsupported envelope version: {version}")]
    UnsupportedVersion { version: u8 },
    #[error("envelope truncated while reading {field}")]
    Truncated { field: &'static str },
    #[error("envelope has {count} trailing bytes")]
    TrailingBytes { count: usize },
    #[error("{field} too long: {len} bytes (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

impl Envelope {
    pub fn new(key_id_hash: u32, nonce: Vec<u8>, aad: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            key_id_hash,
            nonce,
            aad,
            ciphertext,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        if self.version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                version: self.version,
            });
        }
        let nonce_len = u8::try_from(self.nonce.len())
            .map_err(|_| too_long("nonce", self.nonce.len(), u8::MAX as usize))?;
        let aad_len = u16::try_from(self.aad.len())
            .map_err(|_| too_long("aad", self.aad.len(), u16::MAX as usize))?;
        let ct_len = u32::try_from(self.ciphertext.len()).map_err(|_| {
            too_long("ciphertext", self.ciphertext.len(), u32::MAX as usize)
        })?;

        let mut out = Vec::with_capacity(
            1 + 4 + 1 + self.nonce.len() + 2 + self.aad.len() + 4 + self.ciphertext.len(),
        );
        out.push(self.version);
        out.extend_from_slice(&self.key_id_hash.to_be_bytes());
        out.push(nonce_len);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&aad_len.to_be_bytes());
        out.extend_from_slice(&self.aad);
        out.extend_from_slice(&ct_len.to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let mut reader = Reader::new(bytes);

        let version = reader.u8("version")?;
        if version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion { version });
        }
        let key_id_hash = reader.u32("keyIdHash")?;
        let nonce_len = reader.u8("nonceLen")? as usize;
        let nonce = reader.take(nonce_len, "nonce")?.to_vec();
        let aad_len = reader.u16("aadLen")? as usize;
        let aad = reader.take(aad_len, "aad")?.to_vec();
        let ct_len = reader.u32("ctLen")? as usize;
        let ciphertext = reader.take(ct_len, "ciphertext")?.to_vec();

        let remaining = reader.remaining();
        if remaining != 0 {
            return Err(EnvelopeError::TrailingBytes { count: remaining });
        }

        Ok(Self {
            version,
            key_id_hash,
            nonce,
            aad,
            ciphertext,
        })
    }
}

fn too_long(field: &'static str, len: usize, max: usize) -> EnvelopeError {
    EnvelopeError::FieldTooLong { field, len, max }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], EnvelopeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(EnvelopeError::Truncated { field })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, EnvelopeError> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, EnvelopeError> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, EnvelopeError> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
