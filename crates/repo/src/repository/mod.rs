#![forbid(unsafe_code)]
//! The high-level API agents drive: snapshot -> propose -> evaluate ->
//! accept/reject, plus promotion, budgets, lineage queries and GC.

pub mod budget;
pub mod evaluate;
pub mod hooks;
pub mod promote;
pub mod remote;

use crate::cancel::CancelToken;
use crate::error::RepoError;
use crate::fsutil::{now_ms, now_secs, write_atomic};
use crate::layout::{MAIN_WORKSPACE, STATE_DIR_NAME, StateLayout};
use crate::lock::InstanceLock;
use crate::workspace::{UpdateReport, WorkspaceInfo, WorkspaceManager};
use evaluate::{CommandEvaluator, EvalPolicy, Evaluator};
use fl_core::config::RepoConfig;
use fl_core::ids::{LaneName, WorkspaceName};
use fl_core::model::{
    AgentIdentity, CostRecord, EvaluationResult, Intent, LaneInfo, Transition, TransitionStatus,
};
use fl_storage::{
    GcOptions, GcReport, HistoryEntry, SearchHit, SqliteStore, StateDiff, StoreLimits, StoreStats,
    TraceEntry,
};
use hooks::Hook;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Starter `.stateignore` written by init.
const STATEIGNORE_TEMPLATE: &str = "\
# Ignore patterns for snapshots (one per line)
# Lines starting with # are comments
# Patterns ending with / match directories only
# Patterns starting with ! re-include an earlier match

# Build artifacts
# dist/
# target/

# Logs
# *.log
";

#[derive(Clone, Debug)]
pub struct ProposeRequest {
    pub from_state: Option<String>,
    pub to_state: String,
    pub lane: Option<String>,
    pub prompt: String,
    pub agent: AgentIdentity,
    pub tags: Vec<String>,
    pub context_refs: Vec<String>,
    pub metadata: Map<String, Value>,
    pub cost: CostRecord,
}

#[derive(Clone, Debug)]
pub struct CheckpointRequest {
    pub workspace: String,
    pub prompt: String,
    pub agent: AgentIdentity,
    pub lane: Option<String>,
    pub tags: Vec<String>,
    pub context_refs: Vec<String>,
    pub metadata: Map<String, Value>,
    pub cost: CostRecord,
    pub auto_accept: bool,
}

impl CheckpointRequest {
    pub fn new(
        workspace: impl Into<String>,
        prompt: impl Into<String>,
        agent: AgentIdentity,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            prompt: prompt.into(),
            agent,
            lane: None,
            tags: Vec::new(),
            context_refs: Vec::new(),
            metadata: Map::new(),
            cost: CostRecord::default(),
            auto_accept: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CheckpointOutcome {
    /// False when the snapshot equals the lane head; no rows were
    /// created in that case.
    pub changed: bool,
    pub state: String,
    pub transition: Option<Transition>,
    pub budget_warnings: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct RepoStatus {
    pub root: PathBuf,
    pub lanes: Vec<LaneInfo>,
    pub current_head: Option<String>,
    pub pending_proposals: usize,
    pub workspaces: Vec<WorkspaceInfo>,
    pub storage: StoreStats,
}

/// One open repository. No process-wide state: a process may hold
/// handles to several repositories; one handle belongs to one thread.
pub struct Repository {
    layout: StateLayout,
    config: RepoConfig,
    store: SqliteStore,
    workspaces: WorkspaceManager,
    instance: InstanceLock,
    hooks: Vec<Box<dyn Hook>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("layout", &self.layout)
            .field("config", &self.config)
            .field("store", &self.store)
            .field("workspaces", &self.workspaces)
            .field("instance", &self.instance)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl Repository {
    /// Create `.state/` under `root`, write the configuration document
    /// and starter ignore file, create the initial lane and the main
    /// workspace, and record the initial snapshot of whatever files are
    /// already there.
    pub fn init(root: impl AsRef<Path>, initial_lane: &str) -> Result<Self, RepoError> {
        let lane = LaneName::try_new(initial_lane)?;
        std::fs::create_dir_all(root.as_ref())?;
        let root = std::fs::canonicalize(root.as_ref())?;
        let layout = StateLayout::new(&root);

        if layout.state_dir().exists() {
            return Err(RepoError::AlreadyExists {
                what: "repository",
                name: root.display().to_string(),
            });
        }
        std::fs::create_dir_all(layout.state_dir())?;

        let config = RepoConfig::new(lane.as_str(), now_secs());
        write_atomic(&layout.config_path(), &serde_json::to_vec_pretty(&config)?)?;
        if !layout.ignore_file().exists() {
            std::fs::write(layout.ignore_file(), STATEIGNORE_TEMPLATE)?;
        }

        let mut repo = Self::open(&root)?;
        repo.store.create_lane(&lane, None, None, None)?;
        let main = WorkspaceName::try_new(MAIN_WORKSPACE)?;
        repo.workspaces
            .create(&mut repo.store, &main, &lane, None, None, &CancelToken::new())?;

        // The ignore template alone makes the root non-empty, so every
        // init records a genesis snapshot.
        let mut request = CheckpointRequest::new(
            MAIN_WORKSPACE,
            "Initial snapshot",
            AgentIdentity::system("init"),
        );
        request.tags.push("init".to_string());
        request.auto_accept = true;
        repo.checkpoint(request)?;

        Ok(repo)
    }

    /// Open an existing repository, validating its configuration and
    /// fencing against a concurrent open from another host.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, RepoError> {
        let root = std::fs::canonicalize(root.as_ref())?;
        let layout = StateLayout::new(&root);
        if !layout.state_dir().exists() {
            return Err(RepoError::NotARepository { start: root });
        }

        let config: RepoConfig = match std::fs::read_to_string(layout.config_path()) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                RepoConfig::new("main", now_secs())
            }
            Err(err) => return Err(RepoError::Io(err)),
        };
        config.validate()?;

        let limits = StoreLimits {
            max_blob_size: config.effective_max_blob_size(),
            max_tree_depth: config.effective_max_tree_depth(),
            blob_threshold: config.effective_blob_threshold(),
        };
        let store = SqliteStore::open_with_limits(layout.state_dir(), limits)?;
        let instance = InstanceLock::acquire(layout.instance_lock_path())?;
        let workspaces = WorkspaceManager::new(layout.clone());

        Ok(Self { layout, config, store, workspaces, instance, hooks: Vec::new() })
    }

    /// Walk up from `start` looking for a `.state` directory.
    pub fn find(start: impl AsRef<Path>) -> Result<Self, RepoError> {
        let start = start.as_ref().to_path_buf();
        let mut current = start.clone();
        loop {
            if current.join(STATE_DIR_NAME).exists() {
                return Self::open(&current);
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Err(RepoError::NotARepository { start }),
            }
        }
    }

    pub fn close(mut self) -> Result<(), RepoError> {
        self.instance.release();
        self.store.close()?;
        Ok(())
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn default_lane(&self) -> &str {
        &self.config.default_lane
    }

    pub fn store(&mut self) -> &mut SqliteStore {
        &mut self.store
    }

    pub(crate) fn store_ref(&self) -> &SqliteStore {
        &self.store
    }

    pub fn add_hook(&mut self, hook: Box<dyn Hook>) {
        self.hooks.push(hook);
    }

    pub(crate) fn fire(&self, event: &str, context: &Value) {
        for hook in &self.hooks {
            hook.notify(event, context);
        }
    }

    // ── Lanes ─────────────────────────────────────────────────────

    pub fn head(&self, lane: Option<&str>) -> Result<Option<String>, RepoError> {
        let lane = lane.unwrap_or(self.default_lane());
        Ok(self.store.lane_head(lane)?)
    }

    /// Create a lane forked from `base` (default: the default lane's
    /// head), optionally with a workspace materialized at the fork point.
    pub fn create_lane(
        &mut self,
        name: &str,
        base: Option<&str>,
        create_workspace: bool,
    ) -> Result<LaneInfo, RepoError> {
        let lane = LaneName::try_new(name)?;
        let base = match base {
            Some(state) => Some(state.to_string()),
            None => self.head(None)?,
        };
        let info = self
            .store
            .create_lane(&lane, base.as_deref(), base.as_deref(), None)?;
        if create_workspace && base.is_some() {
            let ws = WorkspaceName::try_new(name)?;
            self.workspaces.create(
                &mut self.store,
                &ws,
                &lane,
                base.as_deref(),
                None,
                &CancelToken::new(),
            )?;
        }
        Ok(info)
    }

    pub fn lanes(&self) -> Result<Vec<LaneInfo>, RepoError> {
        Ok(self.store.list_lanes()?)
    }

    pub fn delete_lane(&mut self, name: &str, force: bool) -> Result<bool, RepoError> {
        Ok(self.store.delete_lane(name, force)?)
    }

    // ── Workspaces ────────────────────────────────────────────────

    /// Create a workspace; the lane defaults to the workspace name and
    /// is created on first use, forked from the default lane's head.
    pub fn workspace_create(
        &mut self,
        name: &str,
        lane: Option<&str>,
        state_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<WorkspaceInfo, RepoError> {
        let ws = WorkspaceName::try_new(name)?;
        let lane = LaneName::try_new(lane.unwrap_or(name))?;

        if !self.store.lane_exists(lane.as_str())? {
            let base = match state_id {
                Some(state) => Some(state.to_string()),
                None => self.head(None)?,
            };
            self.store
                .create_lane(&lane, base.as_deref(), base.as_deref(), None)?;
        }
        let state_id = match state_id {
            Some(state) => Some(state.to_string()),
            None => self.store.lane_head(lane.as_str())?,
        };
        self.workspaces.create(
            &mut self.store,
            &ws,
            &lane,
            state_id.as_deref(),
            agent_id,
            &CancelToken::new(),
        )
    }

    pub fn workspace_remove(&mut self, name: &str, force: bool) -> Result<(), RepoError> {
        self.workspaces.remove(name, force)
    }

    /// Incrementally bring a workspace to `state_id` (default: its
    /// lane's head).
    pub fn workspace_update(
        &mut self,
        name: &str,
        state_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<UpdateReport, RepoError> {
        let target = match state_id {
            Some(state) => state.to_string(),
            None => {
                let info = self.workspaces.get(name)?;
                self.store
                    .lane_head(&info.lane)?
                    .ok_or(RepoError::LaneHasNoHead { lane: info.lane })?
            }
        };
        self.workspaces.update(&mut self.store, name, &target, cancel)
    }

    pub fn workspace_is_dirty(&self, name: &str) -> bool {
        self.workspaces.is_dirty(name)
    }

    pub fn workspace_clear_dirty(&self, name: &str) -> Result<(), RepoError> {
        self.workspaces.clear_dirty(name)
    }

    pub fn workspace_recover(&mut self, name: &str) -> Result<Option<String>, RepoError> {
        self.workspaces
            .recover(&mut self.store, name, &CancelToken::new())
    }

    /// Janitor: remove non-active workspaces idle longer than
    /// `max_age_secs`. Returns the removed names.
    pub fn workspace_clean_stale(&mut self, max_age_secs: i64) -> Result<Vec<String>, RepoError> {
        self.workspaces.clean_stale(max_age_secs)
    }

    pub fn workspaces(&self) -> Result<Vec<WorkspaceInfo>, RepoError> {
        self.workspaces.list()
    }

    pub fn workspace(&self, name: &str) -> Result<WorkspaceInfo, RepoError> {
        self.workspaces.get(name)
    }

    pub fn workspace_acquire(&self, name: &str, agent_id: &str) -> Result<(), RepoError> {
        self.workspaces.acquire(name, agent_id)
    }

    pub fn workspace_release(&self, name: &str) -> Result<(), RepoError> {
        self.workspaces.release(name)
    }

    pub(crate) fn workspace_manager(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Restore a workspace to a specific state (incremental).
    pub fn restore(&mut self, workspace: &str, state_id: &str) -> Result<UpdateReport, RepoError> {
        self.workspaces
            .update(&mut self.store, workspace, state_id, &CancelToken::new())
    }

    // ── Snapshot / propose / accept / reject ──────────────────────

    pub fn snapshot(
        &mut self,
        workspace: &str,
        parent: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<String, RepoError> {
        self.workspaces
            .snapshot(&mut self.store, workspace, parent, cancel)
    }

    /// Record a proposed transition between two already-stored states.
    pub fn propose(&mut self, request: ProposeRequest) -> Result<Transition, RepoError> {
        let lane = request
            .lane
            .clone()
            .unwrap_or_else(|| self.default_lane().to_string());
        let warnings = budget::check_budget(&self.store, &lane, Some(&request.cost))?;
        for warning in &warnings {
            warn!(lane = %lane, limit = %warning, "budget approaching limit");
        }

        let intent = Intent {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: request.prompt,
            agent: request.agent,
            context_refs: request.context_refs,
            tags: request.tags,
            metadata: request.metadata,
            created_at: now_ms(),
        };
        let transition = self.store.insert_transition(
            request.from_state.as_deref(),
            &request.to_state,
            &lane,
            &intent,
            request.cost,
        )?;
        self.fire(
            hooks::events::TRANSITION_PROPOSED,
            &json!({
                "transition_id": transition.id,
                "lane": lane,
                "from_state": transition.from_state,
                "to_state": transition.to_state,
            }),
        );
        Ok(transition)
    }

    /// Snapshot a workspace under its lock and propose the result. The
    /// primary agent entry point.
    pub fn checkpoint(&mut self, request: CheckpointRequest) -> Result<CheckpointOutcome, RepoError> {
        let name = request.workspace.clone();
        let agent_id = request.agent.agent_id.clone();
        self.workspaces.acquire(&name, &agent_id)?;
        let result = self.checkpoint_locked(request);
        if let Err(err) = self.workspaces.release(&name) {
            warn!(workspace = %name, error = %err, "failed to release workspace lock");
        }
        result
    }

    fn checkpoint_locked(
        &mut self,
        request: CheckpointRequest,
    ) -> Result<CheckpointOutcome, RepoError> {
        let info = self.workspaces.get(&request.workspace)?;
        let lane = request.lane.clone().unwrap_or_else(|| info.lane.clone());
        let head = self.store.lane_head(&lane)?;

        let cancel = CancelToken::new();
        let child =
            self.workspaces
                .snapshot(&mut self.store, &request.workspace, head.as_deref(), &cancel)?;
        if head.as_deref() == Some(child.as_str()) {
            return Ok(CheckpointOutcome {
                changed: false,
                state: child,
                transition: None,
                budget_warnings: Vec::new(),
            });
        }

        let warnings = budget::check_budget(&self.store, &lane, Some(&request.cost))?;

        let intent = Intent {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: request.prompt.clone(),
            agent: request.agent.clone(),
            context_refs: request.context_refs.clone(),
            tags: request.tags.clone(),
            metadata: request.metadata.clone(),
            created_at: now_ms(),
        };
        let transition =
            self.store
                .insert_transition(head.as_deref(), &child, &lane, &intent, request.cost)?;
        self.fire(
            hooks::events::TRANSITION_PROPOSED,
            &json!({
                "transition_id": transition.id,
                "lane": lane,
                "from_state": transition.from_state,
                "to_state": transition.to_state,
            }),
        );

        let transition = if request.auto_accept {
            let settled = self.evaluate_transition(
                &transition.id,
                &request.workspace,
                EvalPolicy::Gate,
            )?;
            if settled.status == TransitionStatus::Accepted {
                self.workspaces.update_meta(&request.workspace, |info| {
                    info.base_state = Some(child.clone());
                })?;
            }
            settled
        } else {
            transition
        };

        Ok(CheckpointOutcome {
            changed: true,
            state: child,
            transition: Some(transition),
            budget_warnings: warnings,
        })
    }

    /// Accept a proposed transition: status flips and the lane head
    /// advances atomically. A concurrently-moved head surfaces as
    /// `StaleProposal` with nothing mutated.
    pub fn accept(
        &mut self,
        transition_id: &str,
        evaluator: &str,
        summary: &str,
    ) -> Result<Transition, RepoError> {
        let result = EvaluationResult::passed(evaluator, summary);
        let transition = self.store.set_transition_status(
            transition_id,
            TransitionStatus::Accepted,
            Some(&result),
        )?;
        self.fire(
            hooks::events::TRANSITION_ACCEPTED,
            &json!({
                "transition_id": transition.id,
                "lane": transition.lane,
                "to_state": transition.to_state,
            }),
        );
        Ok(transition)
    }

    pub fn reject(
        &mut self,
        transition_id: &str,
        evaluator: &str,
        summary: &str,
    ) -> Result<Transition, RepoError> {
        let result = EvaluationResult::failed(evaluator, summary);
        let transition = self.store.set_transition_status(
            transition_id,
            TransitionStatus::Rejected,
            Some(&result),
        )?;
        self.fire(
            hooks::events::TRANSITION_REJECTED,
            &json!({
                "transition_id": transition.id,
                "lane": transition.lane,
            }),
        );
        Ok(transition)
    }

    pub fn transition(&self, transition_id: &str) -> Result<Transition, RepoError> {
        Ok(self.store.get_transition(transition_id)?)
    }

    pub fn update_cost(
        &mut self,
        transition_id: &str,
        delta: &CostRecord,
    ) -> Result<CostRecord, RepoError> {
        Ok(self.store.update_cost(transition_id, delta)?)
    }

    /// Run the configured evaluators against a workspace and settle the
    /// transition. `Gate` rejects on a required failure; `RecordOnly`
    /// stores the outcome but accepts anyway.
    pub fn evaluate_transition(
        &mut self,
        transition_id: &str,
        workspace: &str,
        policy: EvalPolicy,
    ) -> Result<Transition, RepoError> {
        let info = self.workspaces.get(workspace)?;
        let evaluators: Vec<Box<dyn Evaluator>> = self
            .config
            .evaluators
            .iter()
            .cloned()
            .map(|spec| Box::new(CommandEvaluator::new(spec)) as Box<dyn Evaluator>)
            .collect();
        let result = evaluate::run_all(&evaluators, &info.path);

        let accept = result.passed || policy == EvalPolicy::RecordOnly;
        let status = if accept { TransitionStatus::Accepted } else { TransitionStatus::Rejected };
        let transition = self
            .store
            .set_transition_status(transition_id, status, Some(&result))?;
        let event = if accept {
            hooks::events::TRANSITION_ACCEPTED
        } else {
            hooks::events::TRANSITION_REJECTED
        };
        self.fire(
            event,
            &json!({
                "transition_id": transition.id,
                "lane": transition.lane,
                "passed": result.passed,
            }),
        );
        Ok(transition)
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn history(
        &self,
        lane: Option<&str>,
        limit: usize,
        status: Option<TransitionStatus>,
    ) -> Result<Vec<HistoryEntry>, RepoError> {
        Ok(self.store.history(lane, limit, status)?)
    }

    pub fn trace(&self, state_id: &str, max_depth: usize) -> Result<Vec<TraceEntry>, RepoError> {
        Ok(self.store.trace(state_id, max_depth)?)
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, RepoError> {
        Ok(self.store.search(query, limit)?)
    }

    pub fn diff(&self, state_a: &str, state_b: &str) -> Result<StateDiff, RepoError> {
        Ok(self.store.diff_states(state_a, state_b)?)
    }

    pub fn status(&self) -> Result<RepoStatus, RepoError> {
        let lanes = self.store.list_lanes()?;
        let current_head = if self.store.lane_exists(self.default_lane())? {
            self.store.lane_head(self.default_lane())?
        } else {
            None
        };
        let pending = self
            .store
            .history(None, 1_000, Some(TransitionStatus::Proposed))?;
        Ok(RepoStatus {
            root: self.layout.root().to_path_buf(),
            lanes,
            current_head,
            pending_proposals: pending.len(),
            workspaces: self.workspaces.list()?,
            storage: self.store.stats()?,
        })
    }

    // ── Garbage collection ────────────────────────────────────────

    pub fn gc(&mut self, options: &GcOptions) -> Result<GcReport, RepoError> {
        Ok(self.store.collect_garbage(options)?)
    }

    // ── Remote sync ───────────────────────────────────────────────

    pub fn push_state_to(
        &mut self,
        backend: &mut dyn remote::RemoteStore,
        state_id: &str,
    ) -> Result<remote::PushReport, RepoError> {
        remote::push_state(&mut self.store, backend, state_id)
    }

    pub fn pull_state_from(
        &mut self,
        backend: &dyn remote::RemoteStore,
        state_id: &str,
    ) -> Result<remote::PullReport, RepoError> {
        remote::pull_state(&mut self.store, backend, state_id)
    }

    // ── Budgets ───────────────────────────────────────────────────

    pub fn set_budget(&mut self, lane: &str, config: budget::BudgetConfig) -> Result<(), RepoError> {
        budget::set_lane_budget(&mut self.store, lane, &config)
    }

    pub fn budget_status(&self, lane: &str) -> Result<Option<budget::BudgetStatus>, RepoError> {
        budget::budget_status(&self.store, lane)
    }
}
