//! Concrete capability backends: KEKs in the OS credential store (or memory
//! in tests) and wrapped DEK records as files written atomically.

pub mod file_blob_store;
pub mod key_store;
