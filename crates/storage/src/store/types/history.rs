#![forbid(unsafe_code)]

use fl_core::model::{AgentIdentity, Transition};

/// One row of `history`: the transition plus the intent fields callers
/// nearly always want next to it.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub transition: Transition,
    pub prompt: String,
    pub agent: AgentIdentity,
    pub tags: Vec<String>,
}

/// One hop of a lineage trace: the accepted transition that produced a
/// state on the walk from a descendant back to genesis.
#[derive(Clone, Debug)]
pub struct TraceEntry {
    pub transition_id: String,
    pub from_state: Option<String>,
    pub to_state: String,
    pub prompt: String,
    pub agent: AgentIdentity,
    pub tags: Vec<String>,
    pub created_at_ms: i64,
}

/// A text-search hit over intents, joined with its transition when one
/// references the intent.
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub intent_id: String,
    pub prompt: String,
    pub agent: AgentIdentity,
    pub tags: Vec<String>,
    pub created_at_ms: i64,
    pub transition_id: Option<String>,
    pub lane: Option<String>,
    pub status: Option<String>,
    pub from_state: Option<String>,
    pub to_state: Option<String>,
}
