#![forbid(unsafe_code)]
//! Directory -> tree ingestion. Depth-first, names sorted, symlinks
//! never followed, executable bits preserved, unchanged files skipped
//! through the stat cache. The whole walk commits as one batch.

use crate::cancel::CancelToken;
use crate::error::RepoError;
use crate::fsutil::{file_mode, mtime_ns};
use crate::ignore::IgnoreSet;
use fl_storage::{SqliteStore, StoreError};
use std::path::Path;
use tracing::debug;

/// Hash `root` into the store and return the root tree hash.
pub(crate) fn snapshot_directory(
    store: &mut SqliteStore,
    root: &Path,
    ignore: &IgnoreSet,
    use_cache: bool,
    cancel: &CancelToken,
) -> Result<String, RepoError> {
    store.batch(|store| hash_directory(store, root, ignore, use_cache, cancel, 0, ""))
}

fn hash_directory(
    store: &mut SqliteStore,
    dir: &Path,
    ignore: &IgnoreSet,
    use_cache: bool,
    cancel: &CancelToken,
    depth: u32,
    rel_prefix: &str,
) -> Result<String, RepoError> {
    let limit = store.limits().max_tree_depth;
    if depth >= limit {
        return Err(RepoError::Store(StoreError::TreeTooDeep { depth: depth + 1, limit }));
    }

    let mut names: Vec<(String, std::fs::DirEntry)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        match entry.file_name().into_string() {
            Ok(name) => names.push((name, entry)),
            Err(raw) => {
                debug!(name = ?raw, dir = %dir.display(), "skipping non-UTF-8 entry name");
            }
        }
    }
    names.sort_by(|a, b| a.0.cmp(&b.0));

    let mut entries = Vec::new();
    for (name, entry) in names {
        if cancel.is_canceled() {
            return Err(RepoError::Canceled);
        }

        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            debug!(path = %entry.path().display(), "skipping symlink");
            continue;
        }

        let rel_path = if rel_prefix.is_empty() {
            name.clone()
        } else {
            format!("{rel_prefix}/{name}")
        };

        if file_type.is_file() {
            if ignore.is_ignored(&name, &rel_path, false) {
                continue;
            }
            let metadata = entry.metadata()?;
            let mode = file_mode(&metadata);
            let cache_key = entry.path().to_string_lossy().into_owned();
            let mtime = mtime_ns(&metadata);
            let size = metadata.len() as i64;

            let mut blob_hash = None;
            if use_cache {
                blob_hash = store.check_stat_cache(&cache_key, mtime, size)?;
            }
            let blob_hash = match blob_hash {
                Some(hash) => hash,
                None => {
                    let content = std::fs::read(entry.path())?;
                    let hash = store.put_blob(&content)?;
                    if use_cache {
                        store.update_stat_cache(&cache_key, mtime, size, &hash)?;
                    }
                    hash
                }
            };
            entries.push(fl_core::model::TreeEntry::blob(name, blob_hash, mode));
        } else if file_type.is_dir() {
            if ignore.is_ignored(&name, &rel_path, true) {
                continue;
            }
            let subtree = hash_directory(
                store,
                &entry.path(),
                ignore,
                use_cache,
                cancel,
                depth + 1,
                &rel_path,
            )?;
            entries.push(fl_core::model::TreeEntry::tree(name, subtree));
        }
    }

    Ok(store.put_tree(entries)?)
}
