use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use keyhold_core::{
    record::WrappedDek,
    secret::DekBuffer,
    storage::{KekHandle, WrapAlgorithm},
};
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::{ecies, error::CryptoError};

const PAYLOAD_NONCE_LEN: usize = 12;

/// Wraps DEKs under a KEK and seals payloads under an unwrapped DEK.
///
/// Wrap and unwrap walk the algorithm preference list in order, skipping
/// variants the KEK does not support; a fallback success is logged, not
/// reported as an error.
#[derive(Debug, Clone)]
pub struct EnvelopeCrypto {
    preference: Vec<WrapAlgorithm>,
}

impl Default for EnvelopeCrypto {
    fn default() -> Self {
        Self {
            preference: WrapAlgorithm::PREFERENCE.to_vec(),
        }
    }
}

impl EnvelopeCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip_all, fields(kek = kek.tag()))]
    pub fn wrap<H: KekHandle + ?Sized>(
        &self,
        dek: &DekBuffer,
        kek: &H,
    ) -> Result<WrappedDek, CryptoError> {
        let mut last_err = None;
        for (rank, algorithm) in self.supported_by(kek).enumerate() {
            match ecies::encrypt(algorithm, kek.public_key(), dek.expose()) {
                Ok(blob) => {
                    if rank > 0 {
                        warn!(algorithm = algorithm.name(), "wrapped DEK with fallback algorithm");
                    }
                    return Ok(WrappedDek::new(blob));
                }
                Err(err) => {
                    debug!(algorithm = algorithm.name(), "wrap attempt failed: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CryptoError::NoSupportedAlgorithm {
            tag: kek.tag().to_string(),
        }))
    }

    #[instrument(skip_all, fields(kek = kek.tag()))]
    pub fn unwrap<H: KekHandle + ?Sized>(
        &self,
        wrapped: &WrappedDek,
        kek: &H,
    ) -> Result<DekBuffer, CryptoError> {
        let (ephemeral, ciphertext) = ecies::split(&wrapped.cipher_blob)?;
        let shared = kek.diffie_hellman(&ephemeral)?;

        let mut last_err = None;
        for (rank, algorithm) in self.supported_by(kek).enumerate() {
            match ecies::decrypt(
                algorithm,
                shared.raw_secret_bytes().as_slice(),
                &ephemeral,
                ciphertext,
            ) {
                Ok(plaintext) => {
                    let dek = DekBuffer::from_slice(&plaintext).ok_or_else(|| {
                        CryptoError::Unwrap {
                            reason: format!("unwrapped key has {} bytes", plaintext.len()),
                        }
                    })?;
                    if rank > 0 {
                        warn!(algorithm = algorithm.name(), "unwrapped DEK with fallback algorithm");
                    }
                    return Ok(dek);
                }
                Err(err) => {
                    debug!(algorithm = algorithm.name(), "unwrap attempt failed: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CryptoError::NoSupportedAlgorithm {
            tag: kek.tag().to_string(),
        }))
    }

    /// AES-256-GCM with a random nonce. Returns `(nonce, ciphertext)`.
    pub fn seal(
        &self,
        dek: &DekBuffer,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let cipher = payload_cipher(dek)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|e| CryptoError::Cipher {
                reason: format!("encrypt failed: {e}"),
            })?;
        Ok((nonce.to_vec(), ciphertext))
    }

    pub fn open(
        &self,
        dek: &DekBuffer,
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if nonce.len() != PAYLOAD_NONCE_LEN {
            return Err(CryptoError::Cipher {
                reason: format!("expected {PAYLOAD_NONCE_LEN}-byte nonce, got {}", nonce.len()),
            });
        }
        let cipher = payload_cipher(dek)?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map(Zeroizing::new)
            .map_err(|e| CryptoError::Cipher {
                reason: format!("decrypt failed: {e}"),
            })
    }

    fn supported_by<'a, H: KekHandle + ?Sized>(
        &'a self,
        kek: &'a H,
    ) -> impl Iterator<Item = WrapAlgorithm> + 'a {
        self.preference
            .iter()
            .copied()
            .filter(move |algorithm| kek.supports(*algorithm))
    }
}

fn payload_cipher(dek: &DekBuffer) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(dek.expose()).map_err(|e| CryptoError::Cipher {
        reason: format!("cipher init failed: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use keyhold_core::storage::KeyStoreError;
    use p256::{
        ecdh::{diffie_hellman, SharedSecret},
        PublicKey, SecretKey,
    };

    use super::*;

    struct TestKek {
        secret: SecretKey,
        public: PublicKey,
        supported: Vec<WrapAlgorithm>,
    }

    impl TestKek {
        fn new(supported: &[WrapAlgorithm]) -> Self {
            let secret = SecretKey::random(&mut OsRng);
            let public = secret.public_key();
            Self {
                secret,
                public,
                supported: supported.to_vec(),
            }
        }
    }

    impl KekHandle for TestKek {
        fn tag(&self) -> &str {
            "test-kek"
        }

        fn public_key(&self) -> &PublicKey {
            &self.public
        }

        fn supports(&self, algorithm: WrapAlgorithm) -> bool {
            self.supported.contains(&algorithm)
        }

        fn diffie_hellman(&self, peer: &PublicKey) -> Result<SharedSecret, KeyStoreError> {
            Ok(diffie_hellman(
                self.secret.to_nonzero_scalar(),
                peer.as_affine(),
            ))
        }
    }

    #[test]
    fn unwrap_inverts_wrap() {
        let engine = EnvelopeCrypto::new();
        let kek = TestKek::new(&WrapAlgorithm::PREFERENCE);
        let dek = DekBuffer::generate();

        let wrapped = engine.wrap(&dek, &kek).expect("wrap");
        let unwrapped = engine.unwrap(&wrapped, &kek).expect("unwrap");
        assert_eq!(unwrapped.expose(), dek.expose());
    }

    #[test]
    fn wrapped_blob_never_contains_plaintext_key() {
        let engine = EnvelopeCrypto::new();
        let kek = TestKek::new(&WrapAlgorithm::PREFERENCE);
        let dek = DekBuffer::generate();

        let wrapped = engine.wrap(&dek, &kek).expect("wrap");
        assert!(!wrapped
            .cipher_blob
            .windows(dek.expose().len())
            .any(|window| window == dek.expose()));
    }

    #[test]
    fn falls_back_when_primary_is_unsupported() {
        let engine = EnvelopeCrypto::new();
        let kek = TestKek::new(&[WrapAlgorithm::EciesX963Sha256AesGcm]);
        let dek = DekBuffer::generate();

        let wrapped = engine.wrap(&dek, &kek).expect("fallback wrap");
        let unwrapped = engine.unwrap(&wrapped, &kek).expect("fallback unwrap");
        assert_eq!(unwrapped.expose(), dek.expose());
    }

    #[test]
    fn unwrap_tries_fallback_after_primary_fails() {
        let engine = EnvelopeCrypto::new();
        let fallback_only = TestKek::new(&[WrapAlgorithm::EciesX963Sha256AesGcm]);
        let dek = DekBuffer::generate();
        let wrapped = engine.wrap(&dek, &fallback_only).expect("wrap");

        // Same private key, now advertising both variants.
        let both = TestKek {
            secret: fallback_only.secret.clone(),
            public: fallback_only.public,
            supported: WrapAlgorithm::PREFERENCE.to_vec(),
        };
        let unwrapped = engine.unwrap(&wrapped, &both).expect("unwrap");
        assert_eq!(unwrapped.expose(), dek.expose());
    }

    #[test]
    fn fails_when_no_algorithm_is_supported() {
        let engine = EnvelopeCrypto::new();
        let kek = TestKek::new(&[]);
        let err = engine
            .wrap(&DekBuffer::generate(), &kek)
            .expect_err("nothing supported");
        assert_eq!(
            err,
            CryptoError::NoSupportedAlgorithm {
                tag: "test-kek".into()
            }
        );
    }

    #[test]
    fn unwrap_with_wrong_kek_fails() {
        let engine = EnvelopeCrypto::new();
        let owner = TestKek::new(&WrapAlgorithm::PREFERENCE);
        let stranger = TestKek::new(&WrapAlgorithm::PREFERENCE);
        let wrapped = engine.wrap(&DekBuffer::generate(), &owner).expect("wrap");

        let err = engine.unwrap(&wrapped, &stranger).expect_err("wrong key");
        assert!(matches!(err, CryptoError::Unwrap { .. }));
    }

    #[test]
    fn seal_and_open_payload_with_aad() {
        let engine = EnvelopeCrypto::new();
        let dek = DekBuffer::generate();
        let (nonce, ciphertext) = engine.seal(&dek, b"payload", b"ctx").expect("seal");
        assert_eq!(nonce.len(), PAYLOAD_NONCE_LEN);

        let opened = engine
            .open(&dek, &nonce, &ciphertext, b"ctx")
            .expect("open");
        assert_eq!(opened.as_slice(), b"payload");

        let err = engine
            .open(&dek, &nonce, &ciphertext, b"other")
            .expect_err("aad mismatch");
        assert!(matches!(err, CryptoError::Cipher { .. }));
    }
}
