use p256::{ecdh::SharedSecret, PublicKey};
use thiserror::Error;

/// Errors produced by hardware key store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyStoreError {
    /// A key with this tag already exists.
    #[error("duplicate key for tag: {tag}")]
    DuplicateKey { tag: String },
    /// No key with this tag exists.
    #[error("key not found for tag: {tag}")]
    NotFound { tag: String },
    /// The backend cannot create a key with the requested algorithm or policy.
    #[error("unsupported: {reason}")]
    Unsupported { reason: String },
    /// Any other backend status.
    #[error("key store failure: {reason}")]
    Backend { reason: String },
}

/// Hybrid-encryption variants a KEK may support, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapAlgorithm {
    /// ECIES, X9.63 SHA-256 KDF deriving both AES-256-GCM key and nonce.
    EciesX963Sha256AesGcmVariableIv,
    /// ECIES, X9.63 SHA-256 KDF deriving the AES-256-GCM key; fixed zero nonce.
    EciesX963Sha256AesGcm,
}

impl WrapAlgorithm {
    pub const PREFERENCE: [WrapAlgorithm; 2] = [
        WrapAlgorithm::EciesX963Sha256AesGcmVariableIv,
        WrapAlgorithm::EciesX963Sha256AesGcm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WrapAlgorithm::EciesX963Sha256AesGcmVariableIv => {
                "ecies-x963-sha256-aesgcm-variable-iv"
            }
            WrapAlgorithm::EciesX963Sha256AesGcm => "ecies-x963-sha256-aesgcm",
        }
    }
}

/// When a key may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Only while the device is unlocked; never migrates to another device.
    WhenUnlockedThisDeviceOnly,
}

/// Access constraints attached to a KEK at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    pub availability: Availability,
    /// Private-key operations stay inside the key store boundary.
    pub private_key_usage_only: bool,
}

impl AccessPolicy {
    /// The policy every KEK is created with.
    pub fn device_bound() -> Self {
        Self {
            availability: Availability::WhenUnlockedThisDeviceOnly,
            private_key_usage_only: true,
        }
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::device_bound()
    }
}

/// Opaque reference to a KEK. Exposes the public half and a key agreement
/// primitive; the private scalar never crosses this interface.
pub trait KekHandle: Send + Sync {
    fn tag(&self) -> &str;

    fn public_key(&self) -> &PublicKey;

    fn supports(&self, algorithm: WrapAlgorithm) -> bool;

    /// ECDH between the private half of this KEK and `peer`.
    fn diffie_hellman(&self, peer: &PublicKey) -> Result<SharedSecret, KeyStoreError>;
}

/// Store for asymmetric key-encrypting keys, addressed by tag.
pub trait HardwareKeyStore: Send + Sync {
    type Handle: KekHandle;

    /// Create a new key pair. Fails with `DuplicateKey` if the tag is taken.
    fn generate(&self, tag: &str, policy: &AccessPolicy) -> Result<Self::Handle, KeyStoreError>;

    fn find(&self, tag: &str) -> Result<Self::Handle, KeyStoreError>;

    fn delete(&self, tag: &str) -> Result<(), KeyStoreError>;

    /// Presence check built on `find`.
    fn contains(&self, tag: &str) -> Result<bool, KeyStoreError> {
        match self.find(tag) {
            Ok(_) => Ok(true),
            Err(KeyStoreError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_starts_with_variable_iv() {
        assert_eq!(
            WrapAlgorithm::PREFERENCE[0],
            WrapAlgorithm::EciesX963Sha256AesGcmVariableIv
        );
        assert_ne!(
            WrapAlgorithm::PREFERENCE[0].name(),
            WrapAlgorithm::PREFERENCE[1].name()
        );
    }

    #[test]
    fn default_policy_is_device_bound() {
        let policy = AccessPolicy::default();
        assert_eq!(
            policy.availability,
            Availability::WhenUnlockedThisDeviceOnly
        );
        assert!(policy.private_key_usage_only);
    }
}
