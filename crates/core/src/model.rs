#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Compile-time default for the maximum ingestable blob, in bytes.
pub const DEFAULT_MAX_BLOB_SIZE: u64 = 100 * 1024 * 1024;
/// Compile-time default for the maximum tree nesting depth.
pub const DEFAULT_MAX_TREE_DEPTH: u32 = 100;

/// Mode assigned to regular files when the source filesystem offers none.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Mode assigned to executables and directories.
pub const DEFAULT_EXEC_MODE: u32 = 0o755;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    State,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::State => "state",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "state" => Some(Self::State),
            _ => None,
        }
    }
}

/// What a tree entry points at. Symlinks are deliberately absent: the
/// snapshot walk never follows or records them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            _ => None,
        }
    }
}

/// One row of a directory listing. Entries are kept sorted by name; the
/// same bytes under a different mode hash to the same blob but a distinct
/// tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
    pub hash: String,
    pub mode: u32,
}

impl TreeEntry {
    pub fn blob(name: impl Into<String>, hash: impl Into<String>, mode: u32) -> Self {
        Self { name: name.into(), kind: EntryKind::Blob, hash: hash.into(), mode }
    }

    pub fn tree(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self { name: name.into(), kind: EntryKind::Tree, hash: hash.into(), mode: DEFAULT_DIR_MODE }
    }
}

/// A full snapshot of the project: root tree plus parent pointer. States
/// form a DAG through `parent_id`; a state without a parent is genesis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorldState {
    pub id: String,
    pub root_tree: String,
    pub parent_id: Option<String>,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AgentIdentity {
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            model: None,
            session_id: None,
        }
    }

    /// Identity used for operations the system performs on its own behalf
    /// (initial snapshot, promotions without an explicit author).
    pub fn system(agent_type: impl Into<String>) -> Self {
        Self::new("system", agent_type)
    }
}

/// The structured "why" of a change. Unlike a commit message this is the
/// instruction that caused the change, recorded before evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub prompt: String,
    pub agent: AgentIdentity,
    #[serde(default)]
    pub context_refs: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRecord {
    #[serde(default)]
    pub tokens_in: i64,
    #[serde(default)]
    pub tokens_out: i64,
    #[serde(default)]
    pub api_calls: i64,
    #[serde(default)]
    pub wall_time_ms: i64,
}

impl CostRecord {
    pub fn add(&mut self, delta: &CostRecord) {
        self.tokens_in += delta.tokens_in;
        self.tokens_out += delta.tokens_out;
        self.api_calls += delta.api_calls;
        self.wall_time_ms += delta.wall_time_ms;
    }

    pub fn is_zero(&self) -> bool {
        *self == CostRecord::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionStatus {
    Proposed,
    Evaluating,
    Accepted,
    Rejected,
    /// A lane-history rewrite (external import) replaced this accepted
    /// transition. Nothing in the core sets this; the value is preserved
    /// for interoperability.
    Superseded,
}

impl TransitionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Evaluating => "evaluating",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Superseded => "superseded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "proposed" => Some(Self::Proposed),
            "evaluating" => Some(Self::Evaluating),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }

    /// Legal lifecycle edges. Accepted transitions are never unaccepted;
    /// rejected and superseded are terminal.
    pub fn can_become(self, next: TransitionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Proposed, Self::Evaluating)
                | (Self::Proposed, Self::Accepted)
                | (Self::Proposed, Self::Rejected)
                | (Self::Evaluating, Self::Accepted)
                | (Self::Evaluating, Self::Rejected)
                | (Self::Accepted, Self::Superseded)
        )
    }

    /// Cost records stay additive only while the transition is open.
    pub fn accepts_cost_updates(self) -> bool {
        matches!(self, Self::Proposed | Self::Evaluating)
    }
}

/// Result of one named check inside an evaluation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    pub required: bool,
}

/// The recorded verdict of evaluating a proposed transition. Stored on the
/// transition permanently, pass or fail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub passed: bool,
    pub evaluator: String,
    #[serde(default)]
    pub checks: BTreeMap<String, bool>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EvaluationResult {
    pub fn passed(evaluator: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            passed: true,
            evaluator: evaluator.into(),
            checks: BTreeMap::new(),
            summary: summary.into(),
            duration_ms: 0,
            metadata: Map::new(),
        }
    }

    pub fn failed(evaluator: impl Into<String>, summary: impl Into<String>) -> Self {
        Self { passed: false, ..Self::passed(evaluator, summary) }
    }
}

/// A proposed or realized move between two world states on a lane.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub id: String,
    pub from_state: Option<String>,
    pub to_state: String,
    pub intent_id: String,
    pub lane: String,
    pub status: TransitionStatus,
    pub evaluation: Option<EvaluationResult>,
    pub cost: CostRecord,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A named, append-only chain of accepted world states. Budgets live in
/// `metadata` under the `budget` key.
#[derive(Clone, Debug, PartialEq)]
pub struct LaneInfo {
    pub name: String,
    pub head_state: Option<String>,
    pub fork_base: Option<String>,
    pub created_at: i64,
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Active,
    Idle,
    Stale,
    Disposed,
}

impl WorkspaceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Stale => "stale",
            Self::Disposed => "disposed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_edges() {
        use TransitionStatus::*;
        assert!(Proposed.can_become(Evaluating));
        assert!(Proposed.can_become(Accepted));
        assert!(Evaluating.can_become(Rejected));
        assert!(Accepted.can_become(Superseded));
        assert!(!Accepted.can_become(Rejected));
        assert!(!Rejected.can_become(Proposed));
        assert!(!Superseded.can_become(Accepted));
    }

    #[test]
    fn cost_is_additive() {
        let mut cost = CostRecord { tokens_in: 10, tokens_out: 5, api_calls: 1, wall_time_ms: 100 };
        cost.add(&CostRecord { tokens_in: 2, tokens_out: 3, api_calls: 1, wall_time_ms: 50 });
        assert_eq!(
            cost,
            CostRecord { tokens_in: 12, tokens_out: 8, api_calls: 2, wall_time_ms: 150 }
        );
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TransitionStatus::Proposed,
            TransitionStatus::Evaluating,
            TransitionStatus::Accepted,
            TransitionStatus::Rejected,
            TransitionStatus::Superseded,
        ] {
            assert_eq!(TransitionStatus::parse(status.as_str()), Some(status));
        }
    }
}
