#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

/// Directory holding everything the substrate owns, at the repo root.
pub const STATE_DIR_NAME: &str = ".state";
/// User ignore patterns, one per line, at the repo root.
pub const IGNORE_FILE_NAME: &str = ".stateignore";
/// The workspace that maps to the repository root itself.
pub const MAIN_WORKSPACE: &str = "main";

pub(crate) const DIRTY_MARKER_NAME: &str = ".state_materializing";
pub(crate) const CONFIG_FILE_NAME: &str = "config.json";
pub(crate) const INSTANCE_LOCK_NAME: &str = "instance.lock";

/// Path arithmetic for one repository. Cheap to clone; owns no handles.
///
/// ```text
/// <root>/                       main workspace files
/// <root>/.state/config.json
/// <root>/.state/store.db        (plus blobs/ fan-out, owned by fl_storage)
/// <root>/.state/main.json       main workspace descriptor
/// <root>/.state/main.lockdir/
/// <root>/.state/instance.lock
/// <root>/.state/workspaces/<name>/         feature workspace files
/// <root>/.state/workspaces/<name>.json
/// <root>/.state/workspaces/<name>.lockdir/
/// ```
#[derive(Clone, Debug)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR_NAME)
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join(CONFIG_FILE_NAME)
    }

    pub fn ignore_file(&self) -> PathBuf {
        self.root.join(IGNORE_FILE_NAME)
    }

    pub fn instance_lock_path(&self) -> PathBuf {
        self.state_dir().join(INSTANCE_LOCK_NAME)
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.state_dir().join("workspaces")
    }

    pub fn is_main(&self, name: &str) -> bool {
        name == MAIN_WORKSPACE
    }

    /// Where a workspace's files live. Main is the repo root.
    pub fn workspace_path(&self, name: &str) -> PathBuf {
        if self.is_main(name) {
            self.root.clone()
        } else {
            self.workspaces_dir().join(name)
        }
    }

    pub fn meta_path(&self, name: &str) -> PathBuf {
        if self.is_main(name) {
            self.state_dir().join(format!("{MAIN_WORKSPACE}.json"))
        } else {
            self.workspaces_dir().join(format!("{name}.json"))
        }
    }

    pub fn lock_dir(&self, name: &str) -> PathBuf {
        if self.is_main(name) {
            self.state_dir().join(format!("{MAIN_WORKSPACE}.lockdir"))
        } else {
            self.workspaces_dir().join(format!("{name}.lockdir"))
        }
    }

    pub(crate) fn dirty_marker_path(&self, name: &str) -> PathBuf {
        self.workspace_path(name).join(DIRTY_MARKER_NAME)
    }

    /// Belt-and-braces containment check. Validated names are single path
    /// components, so the derived path's parent must be exactly the
    /// workspaces directory.
    pub(crate) fn workspace_is_contained(&self, name: &str) -> bool {
        if self.is_main(name) {
            return true;
        }
        self.workspaces_dir().join(name).parent() == Some(self.workspaces_dir().as_path())
    }
}
