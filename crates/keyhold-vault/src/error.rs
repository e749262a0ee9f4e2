use thiserror::Error;

/// Stable failure taxonomy for vault operations. Backend errors are logged
/// where they occur and reported as one of these kinds.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    /// Checking presence of either half failed.
    #[error("existence check failed for {name}: {reason}")]
    Validation { name: String, reason: String },

    /// KEK and DEK presence disagree.
    #[error("key pair {name} is inconsistent (kek present: {kek_present}, dek present: {dek_present})")]
    Inconsistent {
        name: String,
        kek_present: bool,
        dek_present: bool,
    },

    #[error("key pair already exists: {name}")]
    AlreadyExists { name: String },

    #[error("key pair not found: {name}")]
    NotFound { name: String },

    /// KEK generation failed for a reason other than a duplicate.
    #[error("key creation failed: {reason}")]
    Creation { reason: String },

    /// Writing or removing the wrapped DEK failed.
    #[error("persistence failed: {reason}")]
    Persistence { reason: String },

    #[error("wrapping DEK failed: {reason}")]
    Wrap { reason: String },

    #[error("unwrapping DEK failed: {reason}")]
    Unwrap { reason: String },

    /// Envelope malformed, sealed under another DEK, or failed authentication.
    #[error("envelope rejected: {reason}")]
    Envelope { reason: String },

    #[error("unknown failure: {reason}")]
    Unknown { reason: String },
}
