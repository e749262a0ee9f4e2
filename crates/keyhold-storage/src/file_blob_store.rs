use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use keyhold_core::storage::{BlobStore, BlobStoreError, FileProtection, WriteOptions};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Marker recognised by common backup tools (borg, restic, tar
/// `--exclude-caches`) as "skip this directory".
const CACHEDIR_TAG: &str = "CACHEDIR.TAG";
const CACHEDIR_SIGNATURE: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This directory holds wrapped keys created by keyhold.\n\
# Backups would only capture ciphertext bound to this device's KEKs.\n";

/// File-backed blob store writing `<root>/<tag>.json`.
/// Writes go through a temp file in the same directory and are linked into
/// place without replacing an existing file.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, tag: &str) -> Result<PathBuf, BlobStoreError> {
        if !is_valid_tag(tag) {
            return Err(BlobStoreError::InvalidTag {
                tag: tag.to_string(),
            });
        }
        Ok(self.root.join(format!("{tag}.json")))
    }

    fn prepare_root(&self, options: &WriteOptions) -> Result<(), BlobStoreError> {
        fs::create_dir_all(&self.root).map_err(write_err)?;
        if options.protection == FileProtection::Strict {
            restrict(&self.root, 0o700)?;
        }
        if options.exclude_from_backup {
            let marker = self.root.join(CACHEDIR_TAG);
            if !marker.exists() {
                fs::write(&marker, CACHEDIR_SIGNATURE).map_err(|e| BlobStoreError::Write {
                    reason: format!("backup exclusion marker: {e}"),
                })?;
            }
        }
        Ok(())
    }
}

impl BlobStore for FsBlobStore {
    #[instrument(skip_all, fields(tag = %tag))]
    fn exists(&self, tag: &str) -> Result<bool, BlobStoreError> {
        let path = self.path_for(tag)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(read_err(err)),
        }
    }

    #[instrument(skip_all, fields(tag = %tag))]
    fn read(&self, tag: &str) -> Result<Vec<u8>, BlobStoreError> {
        let path = self.path_for(tag)?;
        fs::read(&path).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobStoreError::NotFound {
                    tag: tag.to_string(),
                }
            } else {
                read_err(err)
            }
        })
    }

    #[instrument(skip_all, fields(tag = %tag))]
    fn write_atomic(
        &self,
        tag: &str,
        bytes: &[u8],
        options: &WriteOptions,
    ) -> Result<(), BlobStoreError> {
        let path = self.path_for(tag)?;
        self.prepare_root(options)?;

        let mut tmp = NamedTempFile::new_in(&self.root).map_err(write_err)?;
        if options.protection == FileProtection::Strict {
            restrict(tmp.path(), 0o600)?;
        }
        tmp.write_all(bytes).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                BlobStoreError::AlreadyExists {
                    tag: tag.to_string(),
                }
            } else {
                write_err(e.error)
            }
        })?;
        debug!(path = %path.display(), "blob persisted");
        Ok(())
    }

    #[instrument(skip_all, fields(tag = %tag))]
    fn delete(&self, tag: &str) -> Result<(), BlobStoreError> {
        let path = self.path_for(tag)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(BlobStoreError::NotFound {
                tag: tag.to_string(),
            }),
            Err(err) => Err(write_err(err)),
        }
    }
}

/// Tags become file stems: ASCII alphanumerics plus `-`, `_`, `.`, and no
/// leading dot.
fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && !tag.starts_with('.')
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> Result<(), BlobStoreError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        BlobStoreError::Write {
            reason: format!("set permissions on {}: {e}", path.display()),
        }
    })
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> Result<(), BlobStoreError> {
    Ok(())
}

fn read_err<E: ToString>(err: E) -> BlobStoreError {
    BlobStoreError::Read {
        reason: err.to_string(),
    }
}

fn write_err<E: ToString>(err: E) -> BlobStoreError {
    BlobStoreError::Write {
        reason: err.to_string(),
    }
}
