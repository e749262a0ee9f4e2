use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use thiserror::Error;

/// Errors produced by blob store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlobStoreError {
    #[error("blob not found for tag: {tag}")]
    NotFound { tag: String },
    /// Writes never replace an existing blob.
    #[error("blob already exists for tag: {tag}")]
    AlreadyExists { tag: String },
    /// Tag cannot be used as a storage name.
    #[error("invalid blob tag: {tag}")]
    InvalidTag { tag: String },
    #[error("read failure: {reason}")]
    Read { reason: String },
    #[error("write failure: {reason}")]
    Write { reason: String },
}

/// Protection applied to a written blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileProtection {
    /// Strongest class the platform offers (owner-only access).
    #[default]
    Strict,
    /// Whatever the containing directory grants.
    Inherit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    pub exclude_from_backup: bool,
    pub protection: FileProtection,
}

/// Storage for wrapped DEK records, addressed by tag.
pub trait BlobStore: Send + Sync {
    fn exists(&self, tag: &str) -> Result<bool, BlobStoreError>;

    fn read(&self, tag: &str) -> Result<Vec<u8>, BlobStoreError>;

    /// All-or-nothing write that refuses to overwrite an existing blob.
    fn write_atomic(
        &self,
        tag: &str,
        bytes: &[u8],
        options: &WriteOptions,
    ) -> Result<(), BlobStoreError>;

    fn delete(&self, tag: &str) -> Result<(), BlobStoreError>;
}

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    options: WriteOptions,
}

/// In-memory blob store for tests and smoke runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBlobStore {
    inner: Arc<Mutex<HashMap<String, StoredBlob>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `Write`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Options the blob under `tag` was written with.
    pub fn options_for(&self, tag: &str) -> Option<WriteOptions> {
        self.inner
            .lock()
            .ok()
            .and_then(|map| map.get(tag).map(|blob| blob.options))
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, StoredBlob>>, BlobStoreError> {
        self.inner.lock().map_err(|err| BlobStoreError::Read {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl BlobStore for InMemoryBlobStore {
    fn exists(&self, tag: &str) -> Result<bool, BlobStoreError> {
        Ok(self.lock()?.contains_key(tag))
    }

    fn read(&self, tag: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.lock()?
            .get(tag)
            .map(|blob| blob.bytes.clone())
            .ok_or_else(|| BlobStoreError::NotFound {
                tag: tag.to_string(),
            })
    }

    fn write_atomic(
        &self,
        tag: &str,
        bytes: &[u8],
        options: &WriteOptions,
    ) -> Result<(), BlobStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Write {
                reason: "injected write failure".to_string(),
            });
        }
        let mut map = self.lock()?;
        if map.contains_key(tag) {
            return Err(BlobStoreError::AlreadyExists {
                tag: tag.to_string(),
            });
        }
        map.insert(
            tag.to_string(),
            StoredBlob {
                bytes: bytes.to_vec(),
                options: *options,
            },
        );
        Ok(())
    }

    fn delete(&self, tag: &str) -> Result<(), BlobStoreError> {
        self.lock()?
            .remove(tag)
            .map(|_| ())
            .ok_or_else(|| BlobStoreError::NotFound {
                tag: tag.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_delete_round_trip() {
        let store = InMemoryBlobStore::new();
        let options = WriteOptions {
            exclude_from_backup: true,
            protection: FileProtection::Strict,
        };
        store.write_atomic("t", b"blob", &options).expect("write");
        assert!(store.exists("t").expect("exists"));
        assert_eq!(store.read("t").expect("read"), b"blob");
        assert_eq!(store.options_for("t"), Some(options));

        store.delete("t").expect("delete");
        assert!(!store.exists("t").expect("exists"));
        assert_eq!(
            store.delete("t"),
            Err(BlobStoreError::NotFound { tag: "t".into() })
        );
    }

    #[test]
    fn write_refuses_to_overwrite() {
        let store = InMemoryBlobStore::new();
        store
            .write_atomic("t", b"first", &WriteOptions::default())
            .expect("write");
        let err = store
            .write_atomic("t", b"second", &WriteOptions::default())
            .expect_err("overwrite must fail");
        assert!(matches!(err, BlobStoreError::AlreadyExists { .. }));
        assert_eq!(store.read("t").expect("read"), b"first");
    }

    #[test]
    fn injected_write_failure_leaves_nothing_behind() {
        let store = InMemoryBlobStore::new();
        store.set_fail_writes(true);
        let err = store
            .write_atomic("t", b"blob", &WriteOptions::default())
            .expect_err("should fail");
        assert!(matches!(err, BlobStoreError::Write { .. }));
        assert!(!store.exists("t").expect("exists"));
    }
}
