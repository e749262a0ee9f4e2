//! Capability contracts for the two stores backing a key pair.

pub mod blob_store;
pub mod key_store;

pub use blob_store::{BlobStore, BlobStoreError, FileProtection, InMemoryBlobStore, WriteOptions};
pub use key_store::{
    AccessPolicy, Availability, HardwareKeyStore, KekHandle, KeyStoreError, WrapAlgorithm,
};
