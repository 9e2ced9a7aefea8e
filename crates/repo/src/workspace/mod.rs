#![forbid(unsafe_code)]
//! Physically isolated working directories backed by the content store.
//!
//! The `main` workspace is the repository root itself; feature
//! workspaces live under `.state/workspaces/<name>/`. Directories are
//! disposable: the store is the source of truth, so recovery from any
//! interruption is re-materialization.

mod snapshot;
mod transfer;

use crate::cancel::CancelToken;
use crate::error::RepoError;
use crate::fsutil::{now_secs, write_atomic};
use crate::ignore::IgnoreSet;
use crate::layout::StateLayout;
use crate::lock;
use fl_core::ids::{LaneName, WorkspaceName};
use fl_core::model::WorkspaceStatus;
use fl_storage::SqliteStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub use transfer::UpdateReport;

/// Workspace descriptor, stored as JSON next to the workspace directory
/// and replaced atomically on every change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub name: String,
    pub lane: String,
    pub path: PathBuf,
    pub base_state: Option<String>,
    pub status: WorkspaceStatus,
    pub agent_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Sentinel written into a workspace before materialize/update and
/// removed on success. Its presence on open means the previous operation
/// died halfway.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DirtyMarker {
    #[serde(default)]
    pub from_state: Option<String>,
    #[serde(default)]
    pub to_state: Option<String>,
    #[serde(default)]
    pub started_at: i64,
}

#[derive(Clone, Debug)]
pub struct WorkspaceManager {
    layout: StateLayout,
    lock_timeout: Duration,
}

impl WorkspaceManager {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout, lock_timeout: lock::DEFAULT_LOCK_TIMEOUT }
    }

    pub fn with_lock_timeout(layout: StateLayout, lock_timeout: Duration) -> Self {
        Self { layout, lock_timeout }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    // ── Creation ──────────────────────────────────────────────────

    /// Create a workspace, materializing `state_id` into it when given.
    /// The main workspace reuses the repository root; everything else
    /// gets a fresh directory.
    pub fn create(
        &self,
        store: &mut SqliteStore,
        name: &WorkspaceName,
        lane: &LaneName,
        state_id: Option<&str>,
        agent_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<WorkspaceInfo, RepoError> {
        let name_str = name.as_str();
        if !self.layout.workspace_is_contained(name_str) {
            return Err(RepoError::WorkspaceEscapes { name: name_str.to_string() });
        }
        let ws_path = self.layout.workspace_path(name_str);
        let meta_path = self.layout.meta_path(name_str);
        let is_main = self.layout.is_main(name_str);

        if is_main {
            if meta_path.exists() {
                return Err(RepoError::AlreadyExists { what: "workspace", name: name_str.to_string() });
            }
        } else if ws_path.exists() {
            return Err(RepoError::AlreadyExists { what: "workspace", name: name_str.to_string() });
        }

        if let Some(state_id) = state_id {
            let state = store.get_state(state_id)?;
            if !is_main {
                std::fs::create_dir_all(&ws_path)?;
            }
            self.write_dirty_marker(name_str, None, Some(state_id))?;
            transfer::materialize_full(store, &state.root_tree, &ws_path, is_main, cancel)?;
            self.clear_dirty(name_str)?;
        } else if !is_main {
            std::fs::create_dir_all(&ws_path)?;
        }

        let now = now_secs();
        let info = WorkspaceInfo {
            name: name_str.to_string(),
            lane: lane.as_str().to_string(),
            path: ws_path,
            base_state: state_id.map(str::to_string),
            status: if agent_id.is_some() { WorkspaceStatus::Active } else { WorkspaceStatus::Idle },
            agent_id: agent_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        write_atomic(&meta_path, &serde_json::to_vec_pretty(&info)?)?;
        Ok(info)
    }

    // ── Query ─────────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Result<WorkspaceInfo, RepoError> {
        let meta_path = self.layout.meta_path(name);
        let raw = match std::fs::read_to_string(&meta_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepoError::WorkspaceNotFound { name: name.to_string() });
            }
            Err(err) => return Err(RepoError::Io(err)),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layout.meta_path(name).exists()
    }

    pub fn list(&self) -> Result<Vec<WorkspaceInfo>, RepoError> {
        let mut out = Vec::new();
        if let Ok(info) = self.get(crate::layout::MAIN_WORKSPACE) {
            out.push(info);
        }
        let dir = self.layout.workspaces_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(RepoError::Io(err)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            if let Some(name) = file_name.strip_suffix(".json") {
                names.push(name.to_string());
            }
        }
        names.sort();
        for name in names {
            match self.get(&name) {
                Ok(mut info) => {
                    if !info.path.exists() {
                        info.status = WorkspaceStatus::Disposed;
                    }
                    out.push(info);
                }
                Err(err) => warn!(workspace = %name, error = %err, "skipping unreadable descriptor"),
            }
        }
        Ok(out)
    }

    pub(crate) fn update_meta(
        &self,
        name: &str,
        f: impl FnOnce(&mut WorkspaceInfo),
    ) -> Result<WorkspaceInfo, RepoError> {
        let mut info = self.get(name)?;
        f(&mut info);
        info.updated_at = now_secs();
        write_atomic(&self.layout.meta_path(name), &serde_json::to_vec_pretty(&info)?)?;
        Ok(info)
    }

    // ── Materialize / update / snapshot ───────────────────────────

    /// Bring the workspace to `new_state`, writing only what differs from
    /// the recorded base state. The dirty marker brackets the whole
    /// operation; on failure it stays behind for recovery.
    pub fn update(
        &self,
        store: &mut SqliteStore,
        name: &str,
        new_state: &str,
        cancel: &CancelToken,
    ) -> Result<UpdateReport, RepoError> {
        let info = self.get(name)?;
        let is_main = self.layout.is_main(name);

        // Collision scan first: a refused update must leave the
        // workspace untouched, dirty marker included.
        if let Some(base) = info.base_state.as_deref() {
            let diff = store.diff_states(base, new_state)?;
            transfer::check_untracked_collisions(&diff, &info.path, is_main, name)?;
        }

        self.write_dirty_marker(name, info.base_state.as_deref(), Some(new_state))?;
        let report = transfer::apply_update(
            store,
            &info.path,
            info.base_state.as_deref(),
            new_state,
            is_main,
            name,
            cancel,
        )?;
        self.clear_dirty(name)?;
        self.update_meta(name, |info| info.base_state = Some(new_state.to_string()))?;
        Ok(report)
    }

    /// Hash the workspace into the store and mint (or find) its world
    /// state. Parent resolution: explicit override, else the workspace's
    /// base state, else the lane head. An unchanged tree returns the
    /// parent state itself.
    pub fn snapshot(
        &self,
        store: &mut SqliteStore,
        name: &str,
        parent_override: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<String, RepoError> {
        let info = self.get(name)?;
        if let Some(marker) = self.dirty_marker(name) {
            return Err(RepoError::DirtyWorkspace {
                workspace: name.to_string(),
                target_state: marker.to_state,
            });
        }

        let parent = if let Some(parent) = parent_override {
            Some(parent.to_string())
        } else if let Some(base) = &info.base_state {
            Some(base.clone())
        } else if store.lane_exists(&info.lane)? {
            store.lane_head(&info.lane)?
        } else {
            None
        };

        let ignore = IgnoreSet::load(&info.path);
        let root_tree = snapshot::snapshot_directory(store, &info.path, &ignore, true, cancel)?;

        if let Some(parent) = &parent
            && store.get_state(parent)?.root_tree == root_tree
        {
            return Ok(parent.clone());
        }
        Ok(store.put_state(&root_tree, parent.as_deref())?)
    }

    // ── Locking ───────────────────────────────────────────────────

    pub fn acquire(&self, name: &str, agent_id: &str) -> Result<(), RepoError> {
        if !self.exists(name) {
            return Err(RepoError::WorkspaceNotFound { name: name.to_string() });
        }
        lock::acquire(&self.layout.lock_dir(name), name, Some(agent_id), self.lock_timeout)?;
        self.update_meta(name, |info| {
            info.agent_id = Some(agent_id.to_string());
            info.status = WorkspaceStatus::Active;
        })?;
        Ok(())
    }

    pub fn release(&self, name: &str) -> Result<(), RepoError> {
        lock::force_release(&self.layout.lock_dir(name));
        if self.exists(name) {
            self.update_meta(name, |info| {
                info.agent_id = None;
                info.status = WorkspaceStatus::Idle;
            })?;
        }
        Ok(())
    }

    pub fn lock_holder(&self, name: &str) -> Option<lock::LockOwner> {
        lock::read_owner(&self.layout.lock_dir(name))
    }

    // ── Dirty markers ─────────────────────────────────────────────

    pub fn dirty_marker(&self, name: &str) -> Option<DirtyMarker> {
        let raw = std::fs::read_to_string(self.layout.dirty_marker_path(name)).ok()?;
        Some(serde_json::from_str(&raw).unwrap_or_default())
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.layout.dirty_marker_path(name).exists()
    }

    pub fn clear_dirty(&self, name: &str) -> Result<(), RepoError> {
        match std::fs::remove_file(self.layout.dirty_marker_path(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RepoError::Io(err)),
        }
    }

    fn write_dirty_marker(
        &self,
        name: &str,
        from_state: Option<&str>,
        to_state: Option<&str>,
    ) -> Result<(), RepoError> {
        let marker = DirtyMarker {
            from_state: from_state.map(str::to_string),
            to_state: to_state.map(str::to_string),
            started_at: now_secs(),
        };
        write_atomic(
            &self.layout.dirty_marker_path(name),
            &serde_json::to_vec_pretty(&marker)?,
        )?;
        Ok(())
    }

    /// Recover an interrupted workspace: wipe it and re-materialize the
    /// marker's target (falling back to the recorded base state).
    pub fn recover(
        &self,
        store: &mut SqliteStore,
        name: &str,
        cancel: &CancelToken,
    ) -> Result<Option<String>, RepoError> {
        let info = self.get(name)?;
        let marker = self.dirty_marker(name);
        let target = marker
            .and_then(|m| m.to_state)
            .or_else(|| info.base_state.clone());
        let is_main = self.layout.is_main(name);

        match &target {
            Some(state_id) => {
                let state = store.get_state(state_id)?;
                transfer::clean_workspace_contents(&info.path, is_main)?;
                transfer::materialize_full(store, &state.root_tree, &info.path, is_main, cancel)?;
            }
            None => transfer::clean_workspace_contents(&info.path, is_main)?,
        }
        self.clear_dirty(name)?;
        self.update_meta(name, |info| info.base_state = target.clone())?;
        Ok(target)
    }

    // ── Cleanup ───────────────────────────────────────────────────

    /// Remove a workspace. Main keeps its directory (the repo root) but
    /// loses all tracked files; feature workspaces disappear entirely.
    pub fn remove(&self, name: &str, force: bool) -> Result<(), RepoError> {
        let info = self.get(name)?;
        if info.status == WorkspaceStatus::Active && !force {
            return Err(RepoError::WorkspaceActive {
                name: name.to_string(),
                agent_id: info.agent_id,
            });
        }

        lock::force_release(&self.layout.lock_dir(name));
        if self.layout.is_main(name) {
            transfer::clean_workspace_contents(&info.path, true)?;
        } else if info.path.exists() {
            std::fs::remove_dir_all(&info.path)?;
        }
        match std::fs::remove_file(self.layout.meta_path(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RepoError::Io(err)),
        }
    }

    /// Janitor: drop non-active workspaces idle for longer than
    /// `max_age_secs`. Returns the removed names.
    pub fn clean_stale(&self, max_age_secs: i64) -> Result<Vec<String>, RepoError> {
        let now = now_secs();
        let mut removed = Vec::new();
        for info in self.list()? {
            if info.status == WorkspaceStatus::Active {
                continue;
            }
            if now - info.updated_at > max_age_secs {
                self.remove(&info.name, true)?;
                removed.push(info.name);
            }
        }
        Ok(removed)
    }
}
