#![forbid(unsafe_code)]
//! Tree -> directory transfer: full materialization and the incremental
//! update that writes only what changed. Every file lands via temp file
//! + rename; modes are restored from the tree.

use crate::cancel::CancelToken;
use crate::error::RepoError;
use crate::fsutil::{set_file_mode, write_atomic};
use crate::layout::{DIRTY_MARKER_NAME, STATE_DIR_NAME};
use fl_storage::SqliteStore;
use std::path::Path;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateReport {
    pub mode: &'static str,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub unchanged: usize,
}

/// Paths the transfer machinery must never touch inside the main
/// workspace: the substrate's own directory and the in-flight marker.
fn is_protected(path: &str, protect_state: bool) -> bool {
    if path == DIRTY_MARKER_NAME {
        return true;
    }
    protect_state && (path == STATE_DIR_NAME || path.starts_with(".state/"))
}

/// Write the full contents of `root_tree` into `ws_path`.
pub(crate) fn materialize_full(
    store: &mut SqliteStore,
    root_tree: &str,
    ws_path: &Path,
    protect_state: bool,
    cancel: &CancelToken,
) -> Result<usize, RepoError> {
    let files = store.flatten_tree(root_tree)?;
    let mut written = 0;
    for (path, blob) in &files {
        if cancel.is_canceled() {
            return Err(RepoError::Canceled);
        }
        if is_protected(path, protect_state) {
            continue;
        }
        let target = ws_path.join(path);
        let content = store.get_blob(&blob.hash)?;
        write_atomic(&target, &content)?;
        set_file_mode(&target, blob.mode);
        written += 1;
    }
    Ok(written)
}

/// Diff-driven update from `old_state` to `new_state`. With no recorded
/// base the workspace is cleaned and fully materialized instead.
///
/// An untracked file sitting where the target tree wants a new file is a
/// refusal, checked up front so the workspace is untouched on error.
pub(crate) fn apply_update(
    store: &mut SqliteStore,
    ws_path: &Path,
    old_state: Option<&str>,
    new_state: &str,
    is_main: bool,
    workspace: &str,
    cancel: &CancelToken,
) -> Result<UpdateReport, RepoError> {
    let new_root = store.get_state(new_state)?.root_tree;

    let Some(old_state) = old_state else {
        clean_workspace_contents(ws_path, is_main)?;
        let written = materialize_full(store, &new_root, ws_path, is_main, cancel)?;
        return Ok(UpdateReport { mode: "full", added: written, removed: 0, modified: 0, unchanged: 0 });
    };

    let diff = store.diff_states(old_state, new_state)?;
    check_untracked_collisions(&diff, ws_path, is_main, workspace)?;

    for path in diff.removed.keys() {
        if cancel.is_canceled() {
            return Err(RepoError::Canceled);
        }
        if is_protected(path, is_main) {
            continue;
        }
        let target = ws_path.join(path);
        match target.symlink_metadata() {
            Ok(metadata) if metadata.is_dir() => std::fs::remove_dir_all(&target)?,
            Ok(_) => std::fs::remove_file(&target)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %target.display(), "removed file already absent");
            }
            Err(err) => return Err(RepoError::Io(err)),
        }
        if let Some(parent) = target.parent() {
            cleanup_empty_parents(parent, ws_path);
        }
    }

    for (path, blob) in diff.added.iter().chain(diff.modified.iter().map(|(p, c)| (p, &c.after))) {
        if cancel.is_canceled() {
            return Err(RepoError::Canceled);
        }
        if is_protected(path, is_main) {
            continue;
        }
        let target = ws_path.join(path);
        // A directory can occupy a path the new tree turns into a file.
        if target.is_dir() {
            std::fs::remove_dir_all(&target)?;
        }
        let content = store.get_blob(&blob.hash)?;
        write_atomic(&target, &content)?;
        set_file_mode(&target, blob.mode);
    }

    Ok(UpdateReport {
        mode: "incremental",
        added: diff.added.len(),
        removed: diff.removed.len(),
        modified: diff.modified.len(),
        unchanged: diff.unchanged,
    })
}

/// Refuse when an untracked file occupies a path the target tree
/// introduces. Run before the dirty marker is written so a refused
/// update leaves the workspace exactly as it was.
pub(crate) fn check_untracked_collisions(
    diff: &fl_storage::StateDiff,
    ws_path: &Path,
    is_main: bool,
    workspace: &str,
) -> Result<(), RepoError> {
    for path in diff.added.keys() {
        if is_protected(path, is_main) {
            continue;
        }
        if ws_path.join(path).symlink_metadata().is_ok() {
            return Err(RepoError::UntrackedPathCollision {
                workspace: workspace.to_string(),
                path: path.clone(),
            });
        }
    }
    Ok(())
}

/// Empty a workspace directory. The main workspace keeps `.state` and
/// the dirty marker so recovery bookkeeping survives the wipe.
pub(crate) fn clean_workspace_contents(ws_path: &Path, protect_state: bool) -> Result<(), RepoError> {
    let entries = match std::fs::read_dir(ws_path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(RepoError::Io(err)),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if is_protected(&name, protect_state) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Remove now-empty directories from `dir` up to (not including)
/// `stop_at`.
fn cleanup_empty_parents(dir: &Path, stop_at: &Path) {
    let mut current = dir.to_path_buf();
    while current != stop_at && current.starts_with(stop_at) {
        let empty = match std::fs::read_dir(&current) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => false,
        };
        if !empty || std::fs::remove_dir(&current).is_err() {
            break;
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
}
