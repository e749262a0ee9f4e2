use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// DEK ciphertext as produced by hybrid-encrypting the raw key under a KEK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedDek {
    pub cipher_blob: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record encoding failed: {reason}")]
    Encode { reason: String },
    #[error("record decoding failed: {reason}")]
    Decode { reason: String },
}

/// On-disk JSON shape: `{ "cipherBlob": "<base64>" }`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    cipher_blob: String,
}

impl WrappedDek {
    pub fn new(cipher_blob: Vec<u8>) -> Self {
        Self { cipher_blob }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, RecordError> {
        let record = StoredRecord {
            cipher_blob: STANDARD.encode(&self.cipher_blob),
        };
        serde_json::to_vec(&record).map_err(|e| RecordError::Encode {
            reason: e.to_string(),
        })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, RecordError> {
        let record: StoredRecord =
            serde_json::from_slice(bytes).map_err(|e| RecordError::Decode {
                reason: e.to_string(),
            })?;
        let cipher_blob = STANDARD
            .decode(record.cipher_blob)
            .map_err(|e| RecordError::Decode {
                reason: format!("cipherBlob: {e}"),
            })?;
        Ok(Self { cipher_blob })
    }

    /// Short identifier of this DEK generation, carried in envelopes.
    /// First four bytes (big-endian) of SHA-256 over the cipher blob.
    pub fn key_id_hash(&self) -> u32 {
        let digest = Sha256::digest(&self.cipher_blob);
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_base64_field() {
        let record = WrappedDek::new(vec![0, 1, 2, 250]);
        let json = record.to_json().expect("encode");
        let value: serde_json::Value = serde_json::from_slice(&json).expect("json");
        assert_eq!(value["cipherBlob"], "AAEC+g==");

        let decoded = WrappedDek::from_json(&json).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn rejects_bad_base64() {
        let err = WrappedDek::from_json(br#"{"cipherBlob":"not base64!"}"#)
            .expect_err("should reject");
        assert!(matches!(err, RecordError::Decode { .. }));
    }

    #[test]
    fn rejects_missing_field() {
        let err = WrappedDek::from_json(br#"{"blob":"AAAA"}"#).expect_err("should reject");
        assert!(matches!(err, RecordError::Decode { .. }));
    }

    #[test]
    fn key_id_hash_tracks_blob_contents() {
        let a = WrappedDek::new(vec![1; 32]);
        let b = WrappedDek::new(vec![2; 32]);
        assert_eq!(a.key_id_hash(), WrappedDek::new(vec![1; 32]).key_id_hash());
        assert_ne!(a.key_id_hash(), b.key_id_hash());
    }
}
