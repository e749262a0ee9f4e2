//! Key lifecycle orchestration: keeps a hardware-held KEK and its wrapped DEK
//! in step, and seals payloads under the unwrapped DEK.
//!
//! The two stores cannot be committed together. Creation writes the KEK
//! first and the DEK second; deletion removes the DEK first. A failure in
//! between leaves the pair inconsistent, and every later call reports that
//! state instead of repairing it.

pub mod error;
pub mod vault;

pub use error::VaultError;
pub use vault::{CreateOptions, PairState, Vault};
