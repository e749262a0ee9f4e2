//! Core abstractions for Keyhold: key naming, the hardware key store and blob
//! store contracts, the zeroizing DEK buffer, and the persisted wire formats.
//! Concrete backends live in `keyhold-storage`; crypto lives in `keyhold-crypto`.

pub mod envelope;
pub mod record;
pub mod secret;
pub mod storage;
pub mod tags;
