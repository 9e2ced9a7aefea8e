#![forbid(unsafe_code)]
//! Whole-system flows: dedup, head advancement, promotion with and
//! without conflicts, incremental updates and garbage collection.

use fl_core::hash::sha256_hex;
use fl_core::model::{AgentIdentity, EntryKind, TransitionStatus};
use fl_repo::{CancelToken, CheckpointRequest, PromoteRequest, RepoError, Repository};
use fl_storage::{GcOptions, StoreError};
use std::path::Path;
use tempfile::TempDir;

fn agent() -> AgentIdentity {
    AgentIdentity::new("agent-7", "coder")
}

fn checkpoint(repo: &mut Repository, workspace: &str, prompt: &str) -> String {
    let mut request = CheckpointRequest::new(workspace, prompt, agent());
    request.auto_accept = true;
    let outcome = repo.checkpoint(request).expect("checkpoint");
    assert!(outcome.changed, "expected '{prompt}' to change the workspace");
    outcome.state
}

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, content).expect("write file");
}

#[test]
fn identical_content_is_stored_once() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "a.txt", "hello\n");
    write(repo.root(), "b.txt", "hello\n");
    let state = checkpoint(&mut repo, "main", "two identical files");

    let expected = sha256_hex(b"hello\n");
    let root_tree = repo.store().get_state(&state).expect("state").root_tree;
    let entries = repo.store().get_tree(&root_tree).expect("tree");
    let pointing: Vec<&str> = entries
        .iter()
        .filter(|e| e.kind == EntryKind::Blob && e.hash == expected)
        .map(|e| e.name.as_str())
        .collect();
    assert_eq!(pointing, vec!["a.txt", "b.txt"]);

    let blobs = repo
        .store()
        .iter_keys(fl_core::model::ObjectKind::Blob)
        .expect("keys");
    assert_eq!(blobs.iter().filter(|h| **h == expected).count(), 1);
    assert_eq!(repo.store().get_blob(&expected).expect("blob"), b"hello\n");
}

#[test]
fn accept_advances_the_lane_head_through_checkpoint() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "app.py", "print('v1')\n");
    let s1 = checkpoint(&mut repo, "main", "first version");

    assert_eq!(repo.head(None).expect("head"), Some(s1.clone()));
    let history = repo.history(Some("main"), 10, None).expect("history");
    assert_eq!(history[0].transition.to_state, s1);
    assert_eq!(history[0].transition.status, TransitionStatus::Accepted);
    assert_eq!(history[0].prompt, "first version");

    // Nothing changed: no transition is created.
    let outcome = repo
        .checkpoint(CheckpointRequest::new("main", "no-op", agent()))
        .expect("checkpoint");
    assert!(!outcome.changed);
    assert!(outcome.transition.is_none());
    assert_eq!(outcome.state, s1);
}

#[test]
fn clean_promote_composes_both_sides() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "README.md", "A");
    checkpoint(&mut repo, "main", "readme");

    repo.workspace_create("feat", None, None, None).expect("feat workspace");
    let feat_path = repo.workspace("feat").expect("info").path;
    write(&feat_path, "auth.py", "x");
    checkpoint(&mut repo, "feat", "add auth module");

    let outcome = repo.promote(PromoteRequest::new("feat", "main")).expect("promote");
    assert_eq!(outcome.source_lane, "feat");
    assert_eq!(outcome.transition.status, TransitionStatus::Accepted);
    assert!(outcome.overwritten_paths.is_empty());

    let new_head = repo.head(None).expect("head").expect("main head");
    assert_eq!(new_head, outcome.to_state);
    let root_tree = repo.store().get_state(&new_head).expect("state").root_tree;
    let files = repo.store().flatten_tree(&root_tree).expect("flatten");
    assert_eq!(
        repo.store().get_blob(&files["README.md"].hash).expect("readme"),
        b"A"
    );
    assert_eq!(repo.store().get_blob(&files["auth.py"].hash).expect("auth"), b"x");

    let history = repo.history(Some("main"), 10, None).expect("history");
    assert!(history[0].tags.iter().any(|t| t == "promote"));
    assert!(history[0].tags.iter().any(|t| t == "from:feat"));
}

#[test]
fn conflicting_promote_refuses_then_force_overwrites() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "README.md", "A");
    checkpoint(&mut repo, "main", "base readme");

    repo.workspace_create("feat", None, None, None).expect("feat workspace");

    // Both sides touch README.md.
    write(repo.root(), "README.md", "B");
    checkpoint(&mut repo, "main", "main edits readme");
    let feat_path = repo.workspace("feat").expect("info").path;
    write(&feat_path, "README.md", "C");
    checkpoint(&mut repo, "feat", "feat edits readme");

    let head_before = repo.head(None).expect("head");
    let err = repo
        .promote(PromoteRequest::new("feat", "main"))
        .expect_err("conflicting promote must refuse");
    match &err {
        RepoError::PromoteConflict { conflicts, .. } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].path, "README.md");
            assert_eq!(conflicts[0].source_action.as_str(), "modified");
            assert_eq!(conflicts[0].target_action.as_str(), "modified");
        }
        other => panic!("expected PromoteConflict, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 2);
    assert_eq!(repo.head(None).expect("head"), head_before, "refusal mutates nothing");

    let mut request = PromoteRequest::new("feat", "main");
    request.force = true;
    let outcome = repo.promote(request).expect("forced promote");
    assert_eq!(outcome.overwritten_paths, vec!["README.md".to_string()]);

    let head = repo.head(None).expect("head").expect("main head");
    let root_tree = repo.store().get_state(&head).expect("state").root_tree;
    let files = repo.store().flatten_tree(&root_tree).expect("flatten");
    assert_eq!(repo.store().get_blob(&files["README.md"].hash).expect("readme"), b"C");
}

#[test]
fn identical_changes_on_both_sides_do_not_conflict() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "README.md", "A");
    checkpoint(&mut repo, "main", "base");

    repo.workspace_create("feat", None, None, None).expect("feat workspace");

    write(repo.root(), "README.md", "SAME");
    checkpoint(&mut repo, "main", "main converges");
    let feat_path = repo.workspace("feat").expect("info").path;
    write(&feat_path, "README.md", "SAME");
    write(&feat_path, "extra.txt", "new");
    checkpoint(&mut repo, "feat", "feat converges and adds");

    let outcome = repo.promote(PromoteRequest::new("feat", "main")).expect("promote");
    assert!(outcome.overwritten_paths.is_empty());
    let root_tree = repo.store().get_state(&outcome.to_state).expect("state").root_tree;
    let files = repo.store().flatten_tree(&root_tree).expect("flatten");
    assert!(files.contains_key("extra.txt"));
}

#[test]
fn incremental_update_touches_only_changed_files() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "app.py", "v1");
    for i in 0..20 {
        write(repo.root(), &format!("src/mod_{i}.py"), "stable");
    }
    let s0 = checkpoint(&mut repo, "main", "base");

    repo.workspace_create("worker", Some("main"), Some(&s0), None)
        .expect("worker workspace");
    let worker = repo.workspace("worker").expect("info").path;

    // Advance main by touching a single file.
    write(repo.root(), "app.py", "v2");
    let s1 = checkpoint(&mut repo, "main", "bump app");

    let stable = worker.join("src/mod_7.py");
    let mtime_before = std::fs::metadata(&stable).expect("meta").modified().expect("mtime");

    let report = repo
        .workspace_update("worker", Some(&s1), &CancelToken::new())
        .expect("update");
    assert_eq!(report.mode, "incremental");
    assert_eq!(report.modified, 1);
    assert_eq!(report.added, 0);
    assert_eq!(report.removed, 0);

    assert_eq!(std::fs::read(worker.join("app.py")).expect("app"), b"v2");
    let mtime_after = std::fs::metadata(&stable).expect("meta").modified().expect("mtime");
    assert_eq!(mtime_before, mtime_after, "unchanged files are not rewritten");
}

#[test]
fn gc_reclaims_rejected_work_and_then_finds_nothing() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "app.py", "kept");
    let s0 = checkpoint(&mut repo, "main", "base");

    write(repo.root(), "junk.py", "doomed");
    let outcome = repo
        .checkpoint(CheckpointRequest::new("main", "experiment", agent()))
        .expect("propose");
    let t1 = outcome.transition.expect("transition");
    repo.reject(&t1.id, "reviewer", "not wanted").expect("reject");
    std::fs::remove_file(repo.root().join("junk.py")).expect("drop junk");

    let doomed = sha256_hex(b"doomed");
    let report = repo
        .gc(&GcOptions { dry_run: false, max_age_days: 0 })
        .expect("gc");
    assert_eq!(report.deleted_transitions, 1);
    assert_eq!(report.deleted_states, 1);
    assert!(!repo.store().has(&doomed).expect("junk blob swept"));
    assert!(repo.store().state_exists(&s0).expect("base state survives"));
    assert!(repo.store().has(&sha256_hex(b"kept")).expect("live blob survives"));

    let again = repo
        .gc(&GcOptions { dry_run: false, max_age_days: 0 })
        .expect("second gc");
    assert_eq!(again.deleted_objects, 0);
    assert_eq!(again.deleted_states, 0);
    assert_eq!(again.deleted_transitions, 0);
}

#[test]
fn budget_gates_checkpoints_before_any_row_exists() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    repo.set_budget(
        "main",
        fl_repo::BudgetConfig { max_tokens_in: Some(100), ..Default::default() },
    )
    .expect("set budget");

    write(repo.root(), "big.py", "work");
    let mut request = CheckpointRequest::new("main", "expensive", agent());
    request.cost.tokens_in = 150;
    let err = repo.checkpoint(request).expect_err("over budget");
    match err {
        RepoError::BudgetExceeded { lane, exceeded } => {
            assert_eq!(lane, "main");
            assert_eq!(exceeded, vec!["tokens_in".to_string()]);
        }
        other => panic!("expected BudgetExceeded, got {other:?}"),
    }
    let history = repo.history(Some("main"), 10, Some(TransitionStatus::Proposed)).expect("history");
    assert!(history.is_empty(), "no transition row was created");

    // Under the limit but over the alert threshold: warns, proceeds.
    let mut request = CheckpointRequest::new("main", "warned", agent());
    request.cost.tokens_in = 90;
    let outcome = repo.checkpoint(request).expect("within budget");
    assert!(outcome.changed);
    assert_eq!(outcome.budget_warnings, vec!["tokens_in".to_string()]);
}

#[test]
fn stale_checkpoint_surfaces_for_retry() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "app.py", "base");
    checkpoint(&mut repo, "main", "base");

    write(repo.root(), "app.py", "mine");
    let outcome = repo
        .checkpoint(CheckpointRequest::new("main", "mine", agent()))
        .expect("propose");
    let mine = outcome.transition.expect("transition");

    // A competing change lands first.
    write(repo.root(), "app.py", "theirs");
    checkpoint(&mut repo, "main", "theirs");

    let err = repo.accept(&mine.id, "manual", "late accept").expect_err("stale");
    match err {
        RepoError::Store(StoreError::StaleProposal { .. }) => {}
        other => panic!("expected StaleProposal, got {other:?}"),
    }
}
