#![forbid(unsafe_code)]
//! Repository orchestration for the Flanes state substrate.
//!
//! This crate owns everything that touches a working directory: workspace
//! materialization and snapshots, dirty-marker crash recovery, lock
//! directories, the checkpoint/accept/reject flow, path-level promotion
//! between lanes, budget enforcement, evaluator gating and the
//! remote-sync interface. The heavy lifting on durable state lives in
//! `fl_storage`; nothing here re-implements it.

mod cancel;
mod error;
mod fsutil;
mod ignore;
mod layout;
mod lock;
mod repository;
mod workspace;

pub use cancel::CancelToken;
pub use error::{PromoteConflictEntry, RepoError};
pub use ignore::IgnoreSet;
pub use layout::{IGNORE_FILE_NAME, MAIN_WORKSPACE, STATE_DIR_NAME, StateLayout};
pub use lock::{LOCK_MAX_AGE_SECS, LockOwner};
pub use repository::budget::{BudgetConfig, BudgetStatus};
pub use repository::evaluate::{CommandEvaluator, EvalPolicy, Evaluator, EvaluatorRun};
pub use repository::hooks::{Hook, events};
pub use repository::promote::{PromoteOutcome, PromoteRequest};
pub use repository::remote::{
    InMemoryRemote, PullReport, PushReport, RemoteError, RemoteStore, SkippedObject, pull_state,
    push_state,
};
pub use repository::{CheckpointOutcome, CheckpointRequest, ProposeRequest, RepoStatus, Repository};
pub use workspace::{DirtyMarker, UpdateReport, WorkspaceInfo, WorkspaceManager};
