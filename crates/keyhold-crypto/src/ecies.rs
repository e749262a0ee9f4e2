//! ECIES over P-256 with the ANSI X9.63 SHA-256 KDF and AES-256-GCM.
//!
//! Wrapped form:
//!   [ ephemeral public key (65 bytes, SEC1 uncompressed) | ciphertext + tag ]
//!
//! The KDF shared info is the ephemeral public key. The variable-IV variant
//! derives key and nonce from the KDF; the plain variant derives only the key
//! and uses an all-zero nonce, which is sound because every key is single-use.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use keyhold_core::storage::WrapAlgorithm;
use p256::{ecdh::EphemeralSecret, elliptic_curve::sec1::ToEncodedPoint, PublicKey};
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Length of a SEC1 uncompressed P-256 point.
pub const EPHEMERAL_KEY_LEN: usize = 65;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Zeroize, ZeroizeOnDrop)]
struct DerivedKey {
    key: [u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
}

/// ANSI X9.63 KDF with SHA-256 over the ECDH output.
fn x963_kdf(
    shared_secret: &[u8],
    shared_info: &[u8],
    out: &mut [u8],
) -> Result<(), CryptoError> {
    ansi_x963_kdf::derive_key_into::<Sha256>(shared_secret, shared_info, out)
        .map_err(|e| CryptoError::Cipher {
            reason: format!("key derivation failed: {e:?}"),
        })
}

fn derive(
    algorithm: WrapAlgorithm,
    shared_secret: &[u8],
    ephemeral: &[u8],
) -> Result<DerivedKey, CryptoError> {
    let mut derived = DerivedKey {
        key: [0u8; KEY_LEN],
        nonce: [0u8; NONCE_LEN],
    };
    match algorithm {
        WrapAlgorithm::EciesX963Sha256AesGcmVariableIv => {
            let mut okm = Zeroizing::new([0u8; KEY_LEN + NONCE_LEN]);
            x963_kdf(shared_secret, ephemeral, okm.as_mut_slice())?;
            derived.key.copy_from_slice(&okm[..KEY_LEN]);
            derived.nonce.copy_from_slice(&okm[KEY_LEN..]);
        }
        WrapAlgorithm::EciesX963Sha256AesGcm => {
            x963_kdf(shared_secret, ephemeral, &mut derived.key)?;
        }
    }
    Ok(derived)
}

fn cipher_for(derived: &DerivedKey) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(&derived.key).map_err(|e| CryptoError::Cipher {
        reason: format!("cipher init failed: {e}"),
    })
}

/// Encrypt `plaintext` to `recipient` with a fresh ephemeral key.
pub fn encrypt(
    algorithm: WrapAlgorithm,
    recipient: &PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_point = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(recipient);

    let derived = derive(
        algorithm,
        shared.raw_secret_bytes().as_slice(),
        ephemeral_point.as_bytes(),
    )?;
    let ciphertext = cipher_for(&derived)?
        .encrypt(Nonce::from_slice(&derived.nonce), plaintext)
        .map_err(|e| CryptoError::Wrap {
            reason: format!("{}: {e}", algorithm.name()),
        })?;

    let mut out = Vec::with_capacity(EPHEMERAL_KEY_LEN + ciphertext.len());
    out.extend_from_slice(ephemeral_point.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Split a wrapped blob into the sender's ephemeral key and the AEAD output.
pub fn split(blob: &[u8]) -> Result<(PublicKey, &[u8]), CryptoError> {
    if blob.len() < EPHEMERAL_KEY_LEN + TAG_LEN {
        return Err(CryptoError::Unwrap {
            reason: format!("blob too short: {} bytes", blob.len()),
        });
    }
    let (point, ciphertext) = blob.split_at(EPHEMERAL_KEY_LEN);
    let ephemeral = PublicKey::from_sec1_bytes(point).map_err(|e| CryptoError::Unwrap {
        reason: format!("invalid ephemeral key: {e}"),
    })?;
    Ok((ephemeral, ciphertext))
}

/// Decrypt the AEAD part of a wrapped blob given the ECDH output.
pub fn decrypt(
    algorithm: WrapAlgorithm,
    shared_secret: &[u8],
    ephemeral: &PublicKey,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let ephemeral_point = ephemeral.to_encoded_point(false);
    let derived = derive(algorithm, shared_secret, ephemeral_point.as_bytes())?;
    cipher_for(&derived)?
        .decrypt(Nonce::from_slice(&derived.nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|e| CryptoError::Unwrap {
            reason: format!("{}: {e}", algorithm.name()),
        })
}
