use std::fmt::Display;

use keyhold_core::{
    envelope::{Envelope, ENVELOPE_VERSION},
    record::WrappedDek,
    secret::DekBuffer,
    storage::{
        AccessPolicy, BlobStore, BlobStoreError, FileProtection, HardwareKeyStore, KeyStoreError,
        WriteOptions,
    },
    tags::KeyTags,
};
use keyhold_crypto::{CryptoError, EnvelopeCrypto};
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::error::VaultError;

/// Presence of the two halves of a logical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Absent,
    Consistent,
    Inconsistent { kek_present: bool, dek_present: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// Replace an existing pair instead of failing.
    pub force_overwrite: bool,
    /// Mark the wrapped DEK as excluded from backups.
    pub exclude_from_backup: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            force_overwrite: false,
            exclude_from_backup: true,
        }
    }
}

/// Orchestrates a KEK in a [`HardwareKeyStore`] and its wrapped DEK in a
/// [`BlobStore`].
///
/// Every call is synchronous and reads both stores afresh. Nothing here
/// serializes calls for the same name; callers that may race on one name
/// must do that themselves.
pub struct Vault<K: HardwareKeyStore, B: BlobStore> {
    keys: K,
    blobs: B,
    crypto: EnvelopeCrypto,
}

impl<K: HardwareKeyStore, B: BlobStore> Vault<K, B> {
    pub fn new(keys: K, blobs: B) -> Self {
        Self {
            keys,
            blobs,
            crypto: EnvelopeCrypto::new(),
        }
    }

    pub fn key_store(&self) -> &K {
        &self.keys
    }

    pub fn blob_store(&self) -> &B {
        &self.blobs
    }

    /// Presence of both halves, without judging the result.
    #[instrument(skip(self))]
    pub fn pair_state(&self, name: &str) -> Result<PairState, VaultError> {
        let tags = KeyTags::for_name(name);
        let kek_present = self
            .keys
            .contains(&tags.kek)
            .map_err(|e| validation(name, "kek", e))?;
        let dek_present = self
            .blobs
            .exists(&tags.dek)
            .map_err(|e| validation(name, "dek", e))?;

        Ok(match (kek_present, dek_present) {
            (false, false) => PairState::Absent,
            (true, true) => PairState::Consistent,
            (kek_present, dek_present) => PairState::Inconsistent {
                kek_present,
                dek_present,
            },
        })
    }

    /// `true` when both halves exist, `false` when neither does. A mismatch
    /// is reported as [`VaultError::Inconsistent`].
    pub fn exists(&self, name: &str) -> Result<bool, VaultError> {
        match self.pair_state(name)? {
            PairState::Absent => Ok(false),
            PairState::Consistent => Ok(true),
            PairState::Inconsistent {
                kek_present,
                dek_present,
            } => Err(inconsistent(name, kek_present, dek_present)),
        }
    }

    /// Create a KEK, then a fresh DEK wrapped under it.
    ///
    /// A failure after the KEK exists leaves the pair inconsistent; it is
    /// not rolled back.
    #[instrument(skip(self))]
    pub fn create(&self, name: &str, options: CreateOptions) -> Result<(), VaultError> {
        let tags = KeyTags::for_name(name);
        if !options.force_overwrite && self.exists(name)? {
            return Err(VaultError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let policy = AccessPolicy::device_bound();
        let kek = match self.keys.generate(&tags.kek, &policy) {
            Ok(kek) => kek,
            Err(KeyStoreError::DuplicateKey { .. }) if options.force_overwrite => {
                debug!("replacing existing KEK");
                match self.keys.delete(&tags.kek) {
                    Ok(()) | Err(KeyStoreError::NotFound { .. }) => {}
                    Err(err) => return Err(unknown("delete KEK", err)),
                }
                self.keys
                    .generate(&tags.kek, &policy)
                    .map_err(|e| creation(name, e))?
            }
            Err(KeyStoreError::DuplicateKey { .. }) => {
                warn!(name, "KEK appeared after the existence check");
                return Err(VaultError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            Err(err) => return Err(creation(name, err)),
        };

        if options.force_overwrite {
            match self.blobs.delete(&tags.dek) {
                Ok(()) => debug!("removed previous wrapped DEK"),
                Err(BlobStoreError::NotFound { .. }) => {}
                Err(err) => return Err(persistence("remove previous DEK", err)),
            }
        }

        let wrapped = {
            let dek = DekBuffer::generate();
            self.crypto.wrap(&dek, &kek).map_err(|e| {
                warn!(name, "wrap failed: {e}");
                VaultError::Wrap {
                    reason: "no algorithm could wrap the DEK".to_string(),
                }
            })?
        };
        let record = wrapped
            .to_json()
            .map_err(|e| persistence("encode record", e))?;

        let write_options = WriteOptions {
            exclude_from_backup: options.exclude_from_backup,
            protection: FileProtection::Strict,
        };
        match self.blobs.write_atomic(&tags.dek, &record, &write_options) {
            Ok(()) => {}
            Err(BlobStoreError::AlreadyExists { .. }) => {
                warn!(name, "wrapped DEK appeared during create");
                return Err(VaultError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            Err(err) => return Err(persistence("write wrapped DEK", err)),
        }

        info!(name, "key pair created");
        Ok(())
    }

    /// Remove the wrapped DEK, then the KEK. Without `force_delete` both
    /// halves must exist; with it, missing halves are skipped.
    #[instrument(skip(self))]
    pub fn delete(&self, name: &str, force_delete: bool) -> Result<(), VaultError> {
        let tags = KeyTags::for_name(name);
        if !force_delete {
            self.require_consistent(name)?;
        }

        match self.blobs.delete(&tags.dek) {
            Ok(()) => {}
            Err(BlobStoreError::NotFound { .. }) if force_delete => {
                debug!("no wrapped DEK to delete")
            }
            Err(BlobStoreError::NotFound { .. }) => {
                return Err(VaultError::NotFound {
                    name: name.to_string(),
                })
            }
            Err(err) => return Err(persistence("delete wrapped DEK", err)),
        }

        match self.keys.delete(&tags.kek) {
            Ok(()) => {}
            Err(KeyStoreError::NotFound { .. }) if force_delete => debug!("no KEK to delete"),
            Err(KeyStoreError::NotFound { .. }) => {
                return Err(VaultError::NotFound {
                    name: name.to_string(),
                })
            }
            Err(err) => return Err(unknown("delete KEK", err)),
        }

        info!(name, "key pair deleted");
        Ok(())
    }

    /// Seal `plaintext` under the DEK of `name`. The DEK is unwrapped for
    /// this call only.
    #[instrument(skip(self, plaintext, aad), fields(len = plaintext.len()))]
    pub fn encrypt(
        &self,
        name: &str,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Envelope, VaultError> {
        if aad.len() > u16::MAX as usize {
            return Err(VaultError::Envelope {
                reason: format!("aad too long: {} bytes", aad.len()),
            });
        }
        self.require_consistent(name)?;

        let (wrapped, dek) = self.unlock(name)?;
        let (nonce, ciphertext) = self
            .crypto
            .seal(&dek, plaintext, aad)
            .map_err(|e| unknown("seal payload", e))?;
        drop(dek);

        Ok(Envelope::new(
            wrapped.key_id_hash(),
            nonce,
            aad.to_vec(),
            ciphertext,
        ))
    }

    /// Open an envelope produced by [`Vault::encrypt`] for the same name and
    /// DEK generation.
    #[instrument(skip(self, envelope))]
    pub fn decrypt(
        &self,
        name: &str,
        envelope: &Envelope,
    ) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(VaultError::Envelope {
                reason: format!("unsupported version {}", envelope.version),
            });
        }
        self.require_consistent(name)?;

        let (wrapped, dek) = self.unlock(name)?;
        if envelope.key_id_hash != wrapped.key_id_hash() {
            return Err(VaultError::Envelope {
                reason: "sealed under a different key".to_string(),
            });
        }
        self.crypto
            .open(&dek, &envelope.nonce, &envelope.ciphertext, &envelope.aad)
            .map_err(|e| {
                warn!(name, "envelope failed to open: {e}");
                VaultError::Envelope {
                    reason: "authentication failed".to_string(),
                }
            })
    }

    fn require_consistent(&self, name: &str) -> Result<(), VaultError> {
        match self.pair_state(name)? {
            PairState::Consistent => Ok(()),
            PairState::Absent => Err(VaultError::NotFound {
                name: name.to_string(),
            }),
            PairState::Inconsistent {
                kek_present,
                dek_present,
            } => Err(inconsistent(name, kek_present, dek_present)),
        }
    }

    /// Load the wrapped DEK and unwrap it under the KEK.
    fn unlock(&self, name: &str) -> Result<(WrappedDek, DekBuffer), VaultError> {
        let tags = KeyTags::for_name(name);
        let bytes = self.blobs.read(&tags.dek).map_err(|err| match err {
            BlobStoreError::NotFound { .. } => VaultError::NotFound {
                name: name.to_string(),
            },
            err => unknown("read wrapped DEK", err),
        })?;
        let wrapped = WrappedDek::from_json(&bytes).map_err(|e| {
            warn!(name, "wrapped DEK record unreadable: {e}");
            VaultError::Unwrap {
                reason: "wrapped DEK record is unreadable".to_string(),
            }
        })?;

        let kek = self.keys.find(&tags.kek).map_err(|err| match err {
            KeyStoreError::NotFound { .. } => VaultError::NotFound {
                name: name.to_string(),
            },
            err => unknown("find KEK", err),
        })?;
        let dek = self
            .crypto
            .unwrap(&wrapped, &kek)
            .map_err(|e| unwrap_error(name, e))?;
        Ok((wrapped, dek))
    }
}

fn validation(name: &str, half: &str, err: impl Display) -> VaultError {
    warn!(name, half, "existence check failed: {err}");
    VaultError::Validation {
        name: name.to_string(),
        reason: format!("{half} lookup failed"),
    }
}

fn inconsistent(name: &str, kek_present: bool, dek_present: bool) -> VaultError {
    warn!(name, kek_present, dek_present, "key pair is inconsistent");
    VaultError::Inconsistent {
        name: name.to_string(),
        kek_present,
        dek_present,
    }
}

fn creation(name: &str, err: KeyStoreError) -> VaultError {
    warn!(name, "KEK generation failed: {err}");
    let reason = match err {
        KeyStoreError::Unsupported { .. } => "key type not supported by the key store",
        _ => "key store could not generate the KEK",
    };
    VaultError::Creation {
        reason: reason.to_string(),
    }
}

fn persistence(step: &str, err: impl Display) -> VaultError {
    warn!(step, "persistence failed: {err}");
    VaultError::Persistence {
        reason: format!("could not {step}"),
    }
}

fn unwrap_error(name: &str, err: CryptoError) -> VaultError {
    warn!(name, "unwrap failed: {err}");
    let reason = match err {
        CryptoError::NoSupportedAlgorithm { .. } => "KEK supports no wrap algorithm",
        _ => "no algorithm could unwrap the DEK",
    };
    VaultError::Unwrap {
        reason: reason.to_string(),
    }
}

fn unknown(step: &str, err: impl Display) -> VaultError {
    warn!(step, "backend failure: {err}");
    VaultError::Unknown {
        reason: format!("could not {step}"),
    }
}
