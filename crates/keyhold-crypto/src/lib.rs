//! Envelope crypto for Keyhold: ECIES wrapping of DEKs under a KEK handle and
//! AES-256-GCM sealing of payloads under an unwrapped DEK.

pub mod ecies;
pub mod engine;
pub mod error;

pub use engine::EnvelopeCrypto;
pub use error::CryptoError;
