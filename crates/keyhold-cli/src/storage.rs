use std::path::PathBuf;

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use keyhold_storage::{file_blob_store::FsBlobStore, key_store::KeyringKeyStore};
use keyhold_vault::Vault;
use tracing::debug;

pub type ProductionVault = Vault<KeyringKeyStore, FsBlobStore>;

/// Directory holding wrapped DEK records:
/// `<support dir>/<app id>/keys`, where the support dir is the config
/// override or the platform data directory.
pub fn keys_dir(config: &Config) -> Result<PathBuf> {
    let base = match &config.data_dir {
        Some(dir) => dir.clone(),
        None => data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?,
    };
    Ok(base.join(config.app_id()).join("keys"))
}

/// Build a vault backed by the OS credential store and the key directory.
pub fn vault_from_config(config: &Config) -> Result<ProductionVault> {
    let root = keys_dir(config)?;
    debug!(?root, service = config.keyring_service(), "initializing vault");
    Ok(Vault::new(
        KeyringKeyStore::new(config.keyring_service()),
        FsBlobStore::new(root),
    ))
}
