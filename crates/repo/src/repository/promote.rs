#![forbid(unsafe_code)]
//! Compose one lane's work into another without content merging.
//!
//! The ancestor is the lowest common ancestor of the two heads over the
//! `parent_id` chains. Both sides are tree-diffed against it; a path
//! touched on both sides conflicts unless the two outcomes are
//! byte-and-mode identical. A clean (or forced) promote rebuilds the
//! target tree in the store directly and accepts the resulting
//! transition immediately. No file contents are ever inspected.

use super::{Repository, budget, hooks};
use crate::error::{PromoteConflictEntry, RepoError};
use crate::fsutil::now_ms;
use fl_core::model::{AgentIdentity, CostRecord, Intent, Transition, TransitionStatus};
use fl_storage::StateDiff;
use serde_json::json;

#[derive(Clone, Debug)]
pub struct PromoteRequest {
    pub source_workspace: String,
    pub target_lane: String,
    pub prompt: Option<String>,
    pub agent: Option<AgentIdentity>,
    pub tags: Vec<String>,
    /// Overwrite target-side changes at conflicting paths with source
    /// content instead of refusing.
    pub force: bool,
}

impl PromoteRequest {
    pub fn new(source_workspace: impl Into<String>, target_lane: impl Into<String>) -> Self {
        Self {
            source_workspace: source_workspace.into(),
            target_lane: target_lane.into(),
            prompt: None,
            agent: None,
            tags: Vec::new(),
            force: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PromoteOutcome {
    pub transition: Transition,
    pub source_lane: String,
    pub target_lane: String,
    pub ancestor: String,
    pub from_state: String,
    pub to_state: String,
    /// Conflicting paths that were taken from the source side; empty
    /// unless `force` was set.
    pub overwritten_paths: Vec<String>,
}

/// Paths touched by both diffs whose outcomes differ. Identical
/// content+mode outcomes on both sides (including both removing) are
/// convergent, not conflicting; removal against modification always is.
fn conflicting_paths(source: &StateDiff, target: &StateDiff) -> Vec<PromoteConflictEntry> {
    let mut conflicts = Vec::new();
    for path in source.touched_paths() {
        let (Some(source_action), Some(target_action)) =
            (source.action_for(path), target.action_for(path))
        else {
            continue;
        };
        if source.outcome_for(path) == target.outcome_for(path) {
            continue;
        }
        conflicts.push(PromoteConflictEntry {
            path: path.clone(),
            source_action,
            target_action,
        });
    }
    conflicts.sort_by(|a, b| a.path.cmp(&b.path));
    conflicts
}

impl Repository {
    pub fn promote(&mut self, request: PromoteRequest) -> Result<PromoteOutcome, RepoError> {
        let info = self.workspace_manager().get(&request.source_workspace)?;
        let source_lane = info.lane.clone();
        let target_lane = request.target_lane.clone();

        let source_head = self
            .store()
            .lane_head(&source_lane)?
            .ok_or_else(|| RepoError::LaneHasNoHead { lane: source_lane.clone() })?;
        let target_head = self
            .store()
            .lane_head(&target_lane)?
            .ok_or_else(|| RepoError::LaneHasNoHead { lane: target_lane.clone() })?;

        if source_head == target_head {
            return Err(RepoError::NothingToPromote { source_lane, target_lane });
        }

        let ancestor = self
            .store()
            .common_ancestor(&source_head, &target_head)?
            .ok_or_else(|| RepoError::NoCommonAncestor {
                source: source_head.clone(),
                target: target_head.clone(),
            })?;
        if ancestor == source_head {
            return Err(RepoError::NothingToPromote { source_lane, target_lane });
        }

        let ancestor_tree = self.store().get_state(&ancestor)?.root_tree;
        let source_tree = self.store().get_state(&source_head)?.root_tree;
        let target_tree = self.store().get_state(&target_head)?.root_tree;

        let source_diff = self.store().diff_trees(&ancestor_tree, &source_tree)?;
        let target_diff = self.store().diff_trees(&ancestor_tree, &target_tree)?;

        let conflicts = conflicting_paths(&source_diff, &target_diff);
        if !conflicts.is_empty() && !request.force {
            return Err(RepoError::PromoteConflict {
                source_lane,
                target_lane,
                ancestor,
                conflicts,
            });
        }
        let overwritten_paths: Vec<String> =
            conflicts.into_iter().map(|c| c.path).collect();

        // Rebuild the target tree: target content plus the source diff,
        // path by path. Under force the insertions below overwrite the
        // target side at conflicting paths by construction.
        let mut files = self.store().flatten_tree(&target_tree)?;
        for path in source_diff.removed.keys() {
            files.remove(path);
        }
        for (path, blob) in &source_diff.added {
            files.insert(path.clone(), blob.clone());
        }
        for (path, change) in &source_diff.modified {
            files.insert(path.clone(), change.after.clone());
        }

        let warnings = budget::check_budget(self.store_ref(), &target_lane, None)?;
        for warning in &warnings {
            tracing::warn!(lane = %target_lane, limit = %warning, "budget approaching limit");
        }

        let new_root = self.store().build_tree_from_paths(&files)?;
        let new_state = self.store().put_state(&new_root, Some(&target_head))?;

        let agent = request
            .agent
            .unwrap_or_else(|| AgentIdentity::system("promote"));
        let prompt = request.prompt.unwrap_or_else(|| {
            format!("Promote work from '{source_lane}' into '{target_lane}'")
        });
        let mut tags = request.tags;
        tags.push("promote".to_string());
        tags.push(format!("from:{source_lane}"));

        let intent = Intent {
            id: uuid::Uuid::new_v4().to_string(),
            prompt,
            agent,
            context_refs: vec![source_head.clone(), ancestor.clone()],
            tags,
            metadata: serde_json::Map::new(),
            created_at: now_ms(),
        };
        let transition = self.store().insert_transition(
            Some(&target_head),
            &new_state,
            &target_lane,
            &intent,
            CostRecord::default(),
        )?;
        let transition = self.store().set_transition_status(
            &transition.id,
            TransitionStatus::Accepted,
            None,
        )?;

        self.fire(
            hooks::events::LANE_PROMOTED,
            &json!({
                "source_lane": source_lane,
                "target_lane": target_lane,
                "to_state": new_state,
                "forced": request.force,
            }),
        );

        Ok(PromoteOutcome {
            transition,
            source_lane,
            target_lane,
            ancestor,
            from_state: target_head,
            to_state: new_state,
            overwritten_paths,
        })
    }
}
