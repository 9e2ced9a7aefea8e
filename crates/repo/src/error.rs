#![forbid(unsafe_code)]

use crate::lock::LockOwner;
use fl_core::config::ConfigError;
use fl_core::ids::NameError;
use fl_storage::{DiffAction, StoreError};
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromoteConflictEntry {
    pub path: String,
    pub source_action: DiffAction,
    pub target_action: DiffAction,
}

#[derive(Debug)]
pub enum RepoError {
    Store(StoreError),
    Io(std::io::Error),
    Json(serde_json::Error),
    InvalidName(NameError),
    Config(ConfigError),
    NotARepository {
        start: PathBuf,
    },
    AlreadyExists {
        what: &'static str,
        name: String,
    },
    WorkspaceNotFound {
        name: String,
    },
    /// The derived workspace path would land outside the workspaces
    /// directory. Name validation makes this unreachable in practice.
    WorkspaceEscapes {
        name: String,
    },
    WorkspaceActive {
        name: String,
        agent_id: Option<String>,
    },
    LaneHasNoHead {
        lane: String,
    },
    LockBusy {
        workspace: String,
        holder: Option<LockOwner>,
    },
    LockTimeout {
        workspace: String,
        waited_ms: u64,
    },
    /// A dirty marker from an interrupted materialize/update is present.
    /// Snapshots refuse until the workspace is recovered.
    DirtyWorkspace {
        workspace: String,
        target_state: Option<String>,
    },
    /// `update` found an untracked file where the target tree wants to
    /// write. Refusing is the conservative choice; nothing was changed.
    UntrackedPathCollision {
        workspace: String,
        path: String,
    },
    NoCommonAncestor {
        source: String,
        target: String,
    },
    PromoteConflict {
        source_lane: String,
        target_lane: String,
        ancestor: String,
        conflicts: Vec<PromoteConflictEntry>,
    },
    NothingToPromote {
        source_lane: String,
        target_lane: String,
    },
    BudgetExceeded {
        lane: String,
        exceeded: Vec<String>,
    },
    /// Another host holds the instance lock on this repository.
    ConcurrentAccess {
        hostname: String,
        pid: u32,
    },
    Remote(crate::repository::remote::RemoteError),
    Canceled,
}

impl RepoError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.code(),
            Self::Io(_) => "IO",
            Self::Json(_) => "IO",
            Self::InvalidName(_) => "INVALID_INPUT",
            Self::Config(_) => "INVALID_CONFIG",
            Self::NotARepository { .. } => "NOT_A_REPOSITORY",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::WorkspaceNotFound { .. } => "NOT_FOUND",
            Self::WorkspaceEscapes { .. } => "INVALID_INPUT",
            Self::WorkspaceActive { .. } => "WORKSPACE_ACTIVE",
            Self::LaneHasNoHead { .. } => "LANE_HAS_NO_HEAD",
            Self::LockBusy { .. } => "LOCK_BUSY",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::DirtyWorkspace { .. } => "DIRTY_WORKSPACE",
            Self::UntrackedPathCollision { .. } => "UNTRACKED_PATH_COLLISION",
            Self::NoCommonAncestor { .. } => "NO_COMMON_ANCESTOR",
            Self::PromoteConflict { .. } => "PROMOTE_CONFLICT",
            Self::NothingToPromote { .. } => "NOTHING_TO_PROMOTE",
            Self::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            Self::ConcurrentAccess { .. } => "CONCURRENT_ACCESS",
            Self::Remote(_) => "REMOTE",
            Self::Canceled => "CANCELED",
        }
    }

    /// Process exit code for the CLI boundary: 1 validation, 2
    /// conflict/stale/resource, 3 I/O or integrity.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) | Self::Json(_) | Self::Remote(_) => 3,
            Self::Store(err) => match err {
                StoreError::Io(_)
                | StoreError::Sql(_)
                | StoreError::IntegrityMismatch { .. }
                | StoreError::SpillMissing { .. }
                | StoreError::CorruptedLedger { .. } => 3,
                StoreError::StaleProposal { .. } => 2,
                _ => 1,
            },
            Self::PromoteConflict { .. }
            | Self::NothingToPromote { .. }
            | Self::LockBusy { .. }
            | Self::LockTimeout { .. }
            | Self::DirtyWorkspace { .. }
            | Self::UntrackedPathCollision { .. }
            | Self::ConcurrentAccess { .. }
            | Self::Canceled => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for RepoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Json(err) => write!(f, "json: {err}"),
            Self::InvalidName(err) => write!(f, "invalid name: {err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::NotARepository { start } => write!(
                f,
                "not inside a repository (searched from {}); run init first",
                start.display()
            ),
            Self::AlreadyExists { what, name } => write!(f, "{what} already exists: {name}"),
            Self::WorkspaceNotFound { name } => write!(f, "workspace not found: {name}"),
            Self::WorkspaceEscapes { name } => {
                write!(f, "workspace name escapes the workspaces directory: {name}")
            }
            Self::WorkspaceActive { name, agent_id } => match agent_id {
                Some(agent) => {
                    write!(f, "workspace '{name}' is active (agent: {agent}); use force to remove")
                }
                None => write!(f, "workspace '{name}' is active; use force to remove"),
            },
            Self::LaneHasNoHead { lane } => write!(f, "lane '{lane}' has no head state"),
            Self::LockBusy { workspace, holder } => match holder {
                Some(owner) => write!(
                    f,
                    "workspace '{workspace}' is locked by pid {} on {}",
                    owner.pid, owner.hostname
                ),
                None => write!(f, "workspace '{workspace}' is locked"),
            },
            Self::LockTimeout { workspace, waited_ms } => {
                write!(f, "timed out after {waited_ms} ms waiting for lock on '{workspace}'")
            }
            Self::DirtyWorkspace { workspace, target_state } => match target_state {
                Some(state) => write!(
                    f,
                    "workspace '{workspace}' has an interrupted operation targeting {state}; recover it first"
                ),
                None => write!(f, "workspace '{workspace}' is dirty; recover it first"),
            },
            Self::UntrackedPathCollision { workspace, path } => write!(
                f,
                "untracked file '{path}' in workspace '{workspace}' collides with the target state; refusing to overwrite"
            ),
            Self::NoCommonAncestor { source, target } => {
                write!(f, "states {source} and {target} share no common ancestor")
            }
            Self::PromoteConflict { source_lane, target_lane, conflicts, .. } => {
                let paths: Vec<&str> = conflicts.iter().map(|c| c.path.as_str()).collect();
                write!(
                    f,
                    "promote {source_lane} -> {target_lane} conflicts on {} path(s): {}",
                    conflicts.len(),
                    paths.join(", ")
                )
            }
            Self::NothingToPromote { source_lane, target_lane } => {
                write!(f, "nothing to promote from '{source_lane}' into '{target_lane}'")
            }
            Self::BudgetExceeded { lane, exceeded } => {
                write!(f, "budget exceeded for lane '{lane}': {}", exceeded.join(", "))
            }
            Self::ConcurrentAccess { hostname, pid } => write!(
                f,
                "another machine is using this repository (host={hostname}, pid={pid}); use remote sync for multi-host work"
            ),
            Self::Remote(err) => write!(f, "{err}"),
            Self::Canceled => write!(f, "operation canceled"),
        }
    }
}

impl std::error::Error for RepoError {}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<std::io::Error> for RepoError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<NameError> for RepoError {
    fn from(value: NameError) -> Self {
        Self::InvalidName(value)
    }
}

impl From<ConfigError> for RepoError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<crate::repository::remote::RemoteError> for RepoError {
    fn from(value: crate::repository::remote::RemoteError) -> Self {
        Self::Remote(value)
    }
}
