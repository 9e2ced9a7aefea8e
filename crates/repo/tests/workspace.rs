#![forbid(unsafe_code)]
//! Workspace mechanics: materialization fidelity, ignore rules, dirty
//! markers and the untracked-collision refusal.

use fl_core::model::AgentIdentity;
use fl_repo::{CancelToken, CheckpointRequest, RepoError, Repository};
use std::path::Path;
use tempfile::TempDir;

fn agent() -> AgentIdentity {
    AgentIdentity::new("agent-7", "coder")
}

fn checkpoint(repo: &mut Repository, workspace: &str, prompt: &str) -> String {
    let mut request = CheckpointRequest::new(workspace, prompt, agent());
    request.auto_accept = true;
    repo.checkpoint(request).expect("checkpoint").state
}

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, content).expect("write file");
}

#[test]
fn materialized_workspace_matches_the_snapshot() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "src/lib.rs", "pub fn f() {}\n");
    write(repo.root(), "docs/guide.md", "guide\n");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        write(repo.root(), "run.sh", "#!/bin/sh\n");
        std::fs::set_permissions(
            repo.root().join("run.sh"),
            std::fs::Permissions::from_mode(0o755),
        )
        .expect("chmod");
    }
    let state = checkpoint(&mut repo, "main", "layout");

    repo.workspace_create("copy", Some("main"), Some(&state), None)
        .expect("create copy");
    let copy = repo.workspace("copy").expect("info").path;

    assert_eq!(
        std::fs::read(copy.join("src/lib.rs")).expect("lib"),
        b"pub fn f() {}\n"
    );
    assert_eq!(std::fs::read(copy.join("docs/guide.md")).expect("guide"), b"guide\n");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(copy.join("run.sh")).expect("meta").permissions().mode();
        assert_eq!(mode & 0o111, 0o111, "executable bit restored");
    }

    // Snapshot of the copy reproduces the same state id (determinism).
    let resnap = repo
        .snapshot("copy", Some(&state), &CancelToken::new())
        .expect("resnapshot");
    assert_eq!(resnap, state);
}

#[test]
fn snapshots_skip_ignored_and_symlinked_entries() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "kept.txt", "kept");
    write(repo.root(), "node_modules/pkg/index.js", "skipped");
    write(repo.root(), "secret.pem", "skipped");
    write(repo.root(), "build/out.bin", "skipped");
    std::fs::write(
        repo.root().join(".stateignore"),
        "build/\n",
    )
    .expect("stateignore");
    #[cfg(unix)]
    std::os::unix::fs::symlink("/etc/passwd", repo.root().join("link")).expect("symlink");

    let state = checkpoint(&mut repo, "main", "with noise");
    let root_tree = repo.store().get_state(&state).expect("state").root_tree;
    let files = repo.store().flatten_tree(&root_tree).expect("flatten");

    assert!(files.contains_key("kept.txt"));
    assert!(!files.keys().any(|p| p.starts_with("node_modules")));
    assert!(!files.contains_key("secret.pem"));
    assert!(!files.keys().any(|p| p.starts_with("build/")));
    assert!(!files.contains_key("link"));
    assert!(!files.keys().any(|p| p.starts_with(".state/")));
}

#[test]
fn dirty_workspace_refuses_snapshots_until_recovered() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "app.py", "v1");
    let state = checkpoint(&mut repo, "main", "base");

    repo.workspace_create("scratch", Some("main"), Some(&state), None)
        .expect("create scratch");
    let scratch = repo.workspace("scratch").expect("info").path;

    // Simulate an interrupted materialize.
    std::fs::write(
        scratch.join(".state_materializing"),
        serde_json::json!({"to_state": state, "started_at": 0}).to_string(),
    )
    .expect("marker");
    std::fs::write(scratch.join("app.py"), "half-written garbage").expect("clobber");

    let err = repo
        .snapshot("scratch", None, &CancelToken::new())
        .expect_err("dirty workspace must refuse");
    assert!(matches!(err, RepoError::DirtyWorkspace { .. }));
    assert_eq!(err.exit_code(), 2);

    let recovered = repo.workspace_recover("scratch").expect("recover");
    assert_eq!(recovered.as_deref(), Some(state.as_str()));
    assert_eq!(std::fs::read(scratch.join("app.py")).expect("app"), b"v1");
    let resnap = repo.snapshot("scratch", None, &CancelToken::new()).expect("snapshot");
    assert_eq!(resnap, state);
}

#[test]
fn update_refuses_to_overwrite_untracked_files() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "app.py", "v1");
    let s0 = checkpoint(&mut repo, "main", "base");

    repo.workspace_create("worker", Some("main"), Some(&s0), None)
        .expect("create worker");
    let worker = repo.workspace("worker").expect("info").path;

    // Main gains a new file; the worker has an untracked file there.
    write(repo.root(), "notes.md", "tracked content");
    let s1 = checkpoint(&mut repo, "main", "add notes");
    write(&worker, "notes.md", "my private scribbles");

    let err = repo
        .workspace_update("worker", Some(&s1), &CancelToken::new())
        .expect_err("collision must refuse");
    match &err {
        RepoError::UntrackedPathCollision { path, .. } => assert_eq!(path, "notes.md"),
        other => panic!("expected UntrackedPathCollision, got {other:?}"),
    }
    assert_eq!(
        std::fs::read(worker.join("notes.md")).expect("file"),
        b"my private scribbles",
        "nothing was overwritten"
    );
    assert!(
        !worker.join(".state_materializing").exists(),
        "a refused update leaves no dirty marker"
    );

    // Moving the scribbles aside clears the way.
    std::fs::rename(worker.join("notes.md"), worker.join("scribbles.md")).expect("rename");
    let report = repo
        .workspace_update("worker", Some(&s1), &CancelToken::new())
        .expect("update after clearing the path");
    assert_eq!(report.added, 1);
    assert_eq!(std::fs::read(worker.join("notes.md")).expect("file"), b"tracked content");
}

#[test]
fn update_removes_files_and_empty_directories() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");

    write(repo.root(), "src/deep/nested/mod.rs", "x");
    write(repo.root(), "src/lib.rs", "lib");
    let s0 = checkpoint(&mut repo, "main", "nested layout");

    repo.workspace_create("worker", Some("main"), Some(&s0), None)
        .expect("create worker");
    let worker = repo.workspace("worker").expect("info").path;

    std::fs::remove_dir_all(repo.root().join("src/deep")).expect("drop dir");
    let s1 = checkpoint(&mut repo, "main", "flatten");

    let report = repo
        .workspace_update("worker", Some(&s1), &CancelToken::new())
        .expect("update");
    assert_eq!(report.removed, 1);
    assert!(!worker.join("src/deep").exists(), "empty directories are pruned");
    assert!(worker.join("src/lib.rs").exists());
}

#[test]
fn canceled_snapshot_reports_cancellation() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");
    write(repo.root(), "a.txt", "a");

    let token = CancelToken::new();
    token.cancel();
    let err = repo
        .snapshot("main", None, &token)
        .expect_err("pre-canceled token must abort");
    assert!(matches!(err, RepoError::Canceled));
}

#[test]
fn remove_and_clean_stale_dispose_of_workspaces() {
    let dir = TempDir::new().expect("temp dir");
    let mut repo = Repository::init(dir.path(), "main").expect("init");
    write(repo.root(), "app.py", "v1");
    let state = checkpoint(&mut repo, "main", "base");

    repo.workspace_create("short-lived", Some("main"), Some(&state), None)
        .expect("create");
    let path = repo.workspace("short-lived").expect("info").path;
    assert!(path.join("app.py").exists());

    repo.workspace_remove("short-lived", false).expect("remove");
    assert!(!path.exists(), "feature workspace directory is deleted");
    assert!(matches!(
        repo.workspace("short-lived"),
        Err(RepoError::WorkspaceNotFound { .. })
    ));
}
