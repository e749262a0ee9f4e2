use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use base64::{engine::general_purpose, Engine as _};
use keyhold_core::storage::{
    AccessPolicy, HardwareKeyStore, KekHandle, KeyStoreError, WrapAlgorithm,
};
use p256::{
    ecdh::{diffie_hellman, SharedSecret},
    PublicKey, SecretKey,
};
use rand::rngs::OsRng;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

/// OS credential store backed KEKs. Uses the `keyring` crate; each KEK is a
/// P-256 private scalar stored under `(service, tag)`.
///
/// Handles carry only the public key. The scalar is read back for the
/// duration of a single key agreement and wiped afterwards.
pub struct KeyringKeyStore {
    service: String,
}

impl KeyringKeyStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, tag: &str) -> Result<keyring::Entry, KeyStoreError> {
        keyring::Entry::new(&self.service, tag).map_err(|e| KeyStoreError::Backend {
            reason: e.to_string(),
        })
    }

    fn load_secret(&self, tag: &str) -> Result<SecretKey, KeyStoreError> {
        let entry = self.entry(tag)?;
        match entry.get_password() {
            Ok(secret) => decode_secret(&Zeroizing::new(secret)),
            Err(keyring::Error::NoEntry) => Err(KeyStoreError::NotFound {
                tag: tag.to_string(),
            }),
            Err(err) => Err(KeyStoreError::Backend {
                reason: err.to_string(),
            }),
        }
    }
}

/// Handle to a KEK held in the OS credential store.
pub struct KeyringKek {
    service: String,
    tag: String,
    public: PublicKey,
}

impl KekHandle for KeyringKek {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn public_key(&self) -> &PublicKey {
        &self.public
    }

    fn supports(&self, _algorithm: WrapAlgorithm) -> bool {
        true
    }

    fn diffie_hellman(&self, peer: &PublicKey) -> Result<SharedSecret, KeyStoreError> {
        let secret = KeyringKeyStore::new(self.service.clone()).load_secret(&self.tag)?;
        Ok(diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine()))
    }
}

impl HardwareKeyStore for KeyringKeyStore {
    type Handle = KeyringKek;

    #[instrument(skip_all, fields(tag = %tag))]
    fn generate(&self, tag: &str, policy: &AccessPolicy) -> Result<KeyringKek, KeyStoreError> {
        let entry = self.entry(tag)?;
        match entry.get_password() {
            Ok(_) => {
                return Err(KeyStoreError::DuplicateKey {
                    tag: tag.to_string(),
                })
            }
            Err(keyring::Error::NoEntry) => {}
            Err(err) => {
                return Err(KeyStoreError::Backend {
                    reason: err.to_string(),
                })
            }
        }

        // The credential store applies its own at-rest protection; the policy
        // is advisory here.
        debug!(?policy, "generating KEK in OS credential store");
        let secret = SecretKey::random(&mut OsRng);
        entry
            .set_password(&encode_secret(&secret))
            .map_err(|e| KeyStoreError::Backend {
                reason: e.to_string(),
            })?;

        Ok(KeyringKek {
            service: self.service.clone(),
            tag: tag.to_string(),
            public: secret.public_key(),
        })
    }

    #[instrument(skip_all, fields(tag = %tag))]
    fn find(&self, tag: &str) -> Result<KeyringKek, KeyStoreError> {
        let secret = self.load_secret(tag)?;
        Ok(KeyringKek {
            service: self.service.clone(),
            tag: tag.to_string(),
            public: secret.public_key(),
        })
    }

    #[instrument(skip_all, fields(tag = %tag))]
    fn delete(&self, tag: &str) -> Result<(), KeyStoreError> {
        match self.entry(tag)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Err(KeyStoreError::NotFound {
                tag: tag.to_string(),
            }),
            Err(err) => Err(KeyStoreError::Backend {
                reason: err.to_string(),
            }),
        }
    }
}

fn encode_secret(secret: &SecretKey) -> Zeroizing<String> {
    let bytes = Zeroizing::new(secret.to_bytes().to_vec());
    Zeroizing::new(general_purpose::STANDARD.encode(bytes.as_slice()))
}

fn decode_secret(encoded: &str) -> Result<SecretKey, KeyStoreError> {
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map(Zeroizing::new)
        .map_err(|e| KeyStoreError::Backend {
            reason: format!("stored key decode failed: {e}"),
        })?;
    SecretKey::from_slice(&bytes).map_err(|_| KeyStoreError::Backend {
        reason: format!("stored key is not a P-256 scalar ({} bytes)", bytes.len()),
    })
}

#[derive(Clone)]
struct StoredKek {
    secret: SecretKey,
    policy: AccessPolicy,
}

/// In-memory KEK store for tests and ephemeral sessions.
#[derive(Clone)]
pub struct InMemoryKeyStore {
    inner: Arc<Mutex<HashMap<String, StoredKek>>>,
    algorithms: Vec<WrapAlgorithm>,
    fail_generate: Arc<AtomicBool>,
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::with_algorithms(&WrapAlgorithm::PREFERENCE)
    }
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys from this store advertise only `algorithms`. An empty list makes
    /// `generate` report `Unsupported`.
    pub fn with_algorithms(algorithms: &[WrapAlgorithm]) -> Self {
        Self {
            inner: Arc::default(),
            algorithms: algorithms.to_vec(),
            fail_generate: Arc::default(),
        }
    }

    /// Make every subsequent `generate` fail with a backend error.
    pub fn set_fail_generate(&self, fail: bool) {
        self.fail_generate.store(fail, Ordering::SeqCst);
    }

    /// Policy the KEK under `tag` was generated with.
    pub fn policy_for(&self, tag: &str) -> Option<AccessPolicy> {
        self.inner
            .lock()
            .ok()
            .and_then(|map| map.get(tag).map(|kek| kek.policy))
    }

    fn handle(&self, tag: &str, stored: &StoredKek) -> InMemoryKek {
        InMemoryKek {
            tag: tag.to_string(),
            public: stored.secret.public_key(),
            secret: stored.secret.clone(),
            algorithms: self.algorithms.clone(),
        }
    }
}

/// Handle to an in-memory KEK.
#[derive(Debug)]
pub struct InMemoryKek {
    tag: String,
    public: PublicKey,
    secret: SecretKey,
    algorithms: Vec<WrapAlgorithm>,
}

impl KekHandle for InMemoryKek {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn public_key(&self) -> &PublicKey {
        &self.public
    }

    fn supports(&self, algorithm: WrapAlgorithm) -> bool {
        self.algorithms.contains(&algorithm)
    }

    fn diffie_hellman(&self, peer: &PublicKey) -> Result<SharedSecret, KeyStoreError> {
        Ok(diffie_hellman(
            self.secret.to_nonzero_scalar(),
            peer.as_affine(),
        ))
    }
}

impl HardwareKeyStore for InMemoryKeyStore {
    type Handle = InMemoryKek;

    fn generate(&self, tag: &str, policy: &AccessPolicy) -> Result<InMemoryKek, KeyStoreError> {
        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(KeyStoreError::Backend {
                reason: "injected generate failure".to_string(),
            });
        }
        if self.algorithms.is_empty() {
            return Err(KeyStoreError::Unsupported {
                reason: "no wrap algorithm available".to_string(),
            });
        }

        let mut map = self.inner.lock().map_err(|err| KeyStoreError::Backend {
            reason: format!("lock poisoned: {err}"),
        })?;
        if map.contains_key(tag) {
            return Err(KeyStoreError::DuplicateKey {
                tag: tag.to_string(),
            });
        }
        let stored = StoredKek {
            secret: SecretKey::random(&mut OsRng),
            policy: *policy,
        };
        let handle = self.handle(tag, &stored);
        map.insert(tag.to_string(), stored);
        Ok(handle)
    }

    fn find(&self, tag: &str) -> Result<InMemoryKek, KeyStoreError> {
        let map = self.inner.lock().map_err(|err| KeyStoreError::Backend {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.get(tag)
            .map(|stored| self.handle(tag, stored))
            .ok_or_else(|| KeyStoreError::NotFound {
                tag: tag.to_string(),
            })
    }

    fn delete(&self, tag: &str) -> Result<(), KeyStoreError> {
        let mut map = self.inner.lock().map_err(|err| KeyStoreError::Backend {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.remove(tag)
            .map(|_| ())
            .ok_or_else(|| KeyStoreError::NotFound {
                tag: tag.to_string(),
            })
    }
}
