#![forbid(unsafe_code)]
//! Object-level push/pull against an adapter, with integrity checks on
//! every pulled object.

use fl_core::model::AgentIdentity;
use fl_repo::{CheckpointRequest, InMemoryRemote, Repository, pull_state, push_state};
use fl_storage::SqliteStore;
use std::path::Path;
use tempfile::TempDir;

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, content).expect("write file");
}

fn seeded_repo(dir: &TempDir) -> (Repository, String) {
    let mut repo = Repository::init(dir.path(), "main").expect("init");
    write(repo.root(), "src/app.py", "print('hello')\n");
    write(repo.root(), "README.md", "docs\n");
    let mut request =
        CheckpointRequest::new("main", "seed", AgentIdentity::new("agent-7", "coder"));
    request.auto_accept = true;
    let state = repo.checkpoint(request).expect("checkpoint").state;
    (repo, state)
}

#[test]
fn push_then_pull_reproduces_the_state_id() {
    let source_dir = TempDir::new().expect("temp dir");
    let (mut source, state) = seeded_repo(&source_dir);

    let mut remote = InMemoryRemote::new();
    let pushed = push_state(source.store(), &mut remote, &state).expect("push");
    assert!(pushed.pushed >= 4, "state, trees and blobs all land");

    // Second push is all skips.
    let again = push_state(source.store(), &mut remote, &state).expect("re-push");
    assert_eq!(again.pushed, 0);
    assert_eq!(again.skipped_existing, pushed.pushed);

    let sink_dir = TempDir::new().expect("temp dir");
    let mut sink = SqliteStore::open(sink_dir.path()).expect("sink store");
    let report = pull_state(&mut sink, &remote, &state).expect("pull");
    assert!(report.skipped.is_empty(), "clean pull skips nothing: {:?}", report.skipped);

    // Same id, same content on the other side.
    let pulled = sink.get_state(&state).expect("state present");
    let files = sink.flatten_tree(&pulled.root_tree).expect("flatten");
    assert_eq!(
        sink.get_blob(&files["src/app.py"].hash).expect("blob"),
        b"print('hello')\n"
    );

    // Idempotent: a second pull is a no-op.
    let second = pull_state(&mut sink, &remote, &state).expect("second pull");
    assert_eq!(second.fetched, 0);
}

#[test]
fn corrupted_objects_are_skipped_not_ingested() {
    let source_dir = TempDir::new().expect("temp dir");
    let (mut source, state) = seeded_repo(&source_dir);

    let mut remote = InMemoryRemote::new();
    push_state(source.store(), &mut remote, &state).expect("push");

    // Tamper with one blob in transit.
    let readme_hash = fl_core::hash::sha256_hex(b"docs\n");
    remote.corrupt(&format!("blobs/{readme_hash}"), b"tampered bytes");

    let sink_dir = TempDir::new().expect("temp dir");
    let mut sink = SqliteStore::open(sink_dir.path()).expect("sink store");
    let report = pull_state(&mut sink, &remote, &state).expect("pull");

    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].key.ends_with(&readme_hash));
    assert!(report.skipped[0].reason.contains("integrity"));
    assert!(!sink.has(&readme_hash).expect("tampered blob not ingested"));
    // The rest of the closure still landed, the state included.
    assert!(sink.state_exists(&state).expect("state"));
    assert!(
        sink.has(&fl_core::hash::sha256_hex(b"print('hello')\n"))
            .expect("intact sibling blob landed")
    );
}

#[test]
fn corrupted_tree_skips_its_ancestors() {
    let source_dir = TempDir::new().expect("temp dir");
    let (mut source, state) = seeded_repo(&source_dir);

    let mut remote = InMemoryRemote::new();
    push_state(source.store(), &mut remote, &state).expect("push");

    // Corrupt the src/ subtree object.
    let root_tree = source.store().get_state(&state).expect("state").root_tree;
    let src_tree = source
        .store()
        .get_tree(&root_tree)
        .expect("root entries")
        .into_iter()
        .find(|e| e.name == "src")
        .expect("src subtree")
        .hash;
    remote.corrupt(&format!("trees/{src_tree}"), b"not a tree");

    let sink_dir = TempDir::new().expect("temp dir");
    let mut sink = SqliteStore::open(sink_dir.path()).expect("sink store");
    let report = pull_state(&mut sink, &remote, &state).expect("pull");

    assert!(!sink.state_exists(&state).expect("state withheld"), "root unreachable");
    assert!(
        report.skipped.iter().any(|s| s.key == format!("trees/{src_tree}")),
        "corrupt subtree reported"
    );
    assert!(
        report.skipped.iter().any(|s| s.reason.contains("skipped")),
        "dependents reported as skipped"
    );
}
