use std::fmt;

use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a data-encrypting key in bytes (256 bits).
pub const DEK_LEN: usize = 32;

/// Owned plaintext DEK. Memory is overwritten with zeros when the buffer is
/// dropped, including on early returns and unwinding.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DekBuffer([u8; DEK_LEN]);

impl DekBuffer {
    /// Fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut dek = Self([0u8; DEK_LEN]);
        OsRng.fill_bytes(&mut dek.0);
        dek
    }

    /// Copy key bytes out of a decrypted slice. Returns `None` on wrong length.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != DEK_LEN {
            return None;
        }
        let mut dek = Self([0u8; DEK_LEN]);
        dek.0.copy_from_slice(bytes);
        Some(dek)
    }

    pub fn expose(&self) -> &[u8; DEK_LEN] {
        &self.0
    }
}

impl fmt::Debug for DekBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DekBuffer([redacted])")
    }
}
