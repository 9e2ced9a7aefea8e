#![forbid(unsafe_code)]
//! Fan-out files for blobs too large to inline in the database.

use super::*;
use std::io::Write as _;
use std::path::PathBuf;

impl SqliteStore {
    /// `blobs/aa/bb/<hash>` under the state directory.
    pub(super) fn fs_blob_path(&self, hash: &str) -> PathBuf {
        self.blobs_dir().join(&hash[..2]).join(&hash[2..4]).join(hash)
    }

    /// Write a spilled blob atomically: temp file in the final directory,
    /// fsync, rename. Idempotent when the file already exists.
    pub(super) fn write_fs_blob(&self, hash: &str, content: &[u8]) -> Result<(), StoreError> {
        let fs_path = self.fs_blob_path(hash);
        if fs_path.exists() {
            return Ok(());
        }
        let parent = fs_path
            .parent()
            .ok_or(StoreError::InvalidInput("blob path has no parent"))?;
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::Builder::new().prefix(".blob.").tempfile_in(parent)?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&fs_path).map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }

    pub(super) fn read_fs_blob(&self, hash: &str) -> Result<Vec<u8>, StoreError> {
        let fs_path = self.fs_blob_path(hash);
        match std::fs::read(&fs_path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::SpillMissing { hash: hash.to_string() })
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    pub(super) fn delete_fs_blob(&self, hash: &str) -> Result<(), StoreError> {
        let fs_path = self.fs_blob_path(hash);
        match std::fs::remove_file(&fs_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }
}
