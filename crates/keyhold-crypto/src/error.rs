use keyhold_core::storage::KeyStoreError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("no supported wrap algorithm for key: {tag}")]
    NoSupportedAlgorithm { tag: String },

    #[error("wrap failed: {reason}")]
    Wrap { reason: String },

    #[error("unwrap failed: {reason}")]
    Unwrap { reason: String },

    #[error("cipher failure: {reason}")]
    Cipher { reason: String },

    #[error("key agreement failed: {0}")]
    KeyStore(#[from] KeyStoreError),
}
