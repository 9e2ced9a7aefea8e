#![forbid(unsafe_code)]

use fl_core::ids::LaneName;
use fl_core::model::{AgentIdentity, CostRecord, Intent, TransitionStatus, TreeEntry};
use fl_storage::{GcOptions, SqliteStore, StoreLimits};
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("fl_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn intent(seq: u32, prompt: &str) -> Intent {
    Intent {
        id: format!("intent-{seq}"),
        prompt: prompt.to_string(),
        agent: AgentIdentity::new("agent-7", "coder"),
        context_refs: Vec::new(),
        tags: Vec::new(),
        metadata: serde_json::Map::new(),
        created_at: 1_700_000_000_000 + seq as i64,
    }
}

fn state_of(store: &mut SqliteStore, files: &[(&str, &str)], parent: Option<&str>) -> String {
    let mut entries = Vec::new();
    for (name, text) in files {
        let blob = store.put_blob(text.as_bytes()).expect("blob");
        entries.push(TreeEntry::blob(*name, &blob, 0o644));
    }
    let tree = store.put_tree(entries).expect("tree");
    store.put_state(&tree, parent).expect("state")
}

/// The spec's GC scenario: an aged-out rejected transition takes its
/// private state and blobs with it, a second run finds nothing more.
#[test]
fn rejected_transition_sweep_is_idempotent() {
    let dir = temp_dir("rejected_transition_sweep_is_idempotent");
    let mut store = SqliteStore::open(&dir).expect("open store");
    store
        .create_lane(&LaneName::try_new("main").expect("name"), None, None, None)
        .expect("create lane");

    let s0 = state_of(&mut store, &[("app.py", "kept\n")], None);
    let t0 = store
        .insert_transition(None, &s0, "main", &intent(0, "init"), CostRecord::default())
        .expect("propose");
    store
        .set_transition_status(&t0.id, TransitionStatus::Accepted, None)
        .expect("accept");

    let s1 = state_of(&mut store, &[("app.py", "kept\n"), ("junk.py", "doomed\n")], Some(&s0));
    let t1 = store
        .insert_transition(Some(&s0), &s1, "main", &intent(1, "experiment"), CostRecord::default())
        .expect("propose");
    store
        .set_transition_status(&t1.id, TransitionStatus::Rejected, None)
        .expect("reject");

    let doomed_blob = fl_core::hash::sha256_hex(b"doomed\n");
    let kept_blob = fl_core::hash::sha256_hex(b"kept\n");
    assert!(store.has(&doomed_blob).expect("present before gc"));

    // Dry run reports without deleting.
    let preview = store
        .collect_garbage(&GcOptions { dry_run: true, max_age_days: 0 })
        .expect("dry run");
    assert!(preview.dry_run);
    assert_eq!(preview.deleted_transitions, 1);
    assert!(store.has(&doomed_blob).expect("dry run must not delete"));

    let report = store
        .collect_garbage(&GcOptions { dry_run: false, max_age_days: 0 })
        .expect("sweep");
    assert_eq!(report.deleted_transitions, 1);
    assert_eq!(report.deleted_states, 1);
    assert!(report.deleted_objects >= 2, "junk blob and S1 tree at minimum");

    assert!(!store.has(&doomed_blob).expect("junk blob swept"));
    assert!(!store.state_exists(&s1).expect("S1 swept"));
    assert!(store.has(&kept_blob).expect("live blob survives"));
    assert!(store.state_exists(&s0).expect("S0 survives"));
    assert!(store.get_transition(&t1.id).is_err(), "T1 row deleted");
    assert!(store.get_transition(&t0.id).is_ok(), "accepted history survives");

    let second = store
        .collect_garbage(&GcOptions { dry_run: false, max_age_days: 0 })
        .expect("second sweep");
    assert_eq!(second.deleted_objects, 0);
    assert_eq!(second.deleted_states, 0);
    assert_eq!(second.deleted_transitions, 0);
}

#[test]
fn recent_rejections_survive_the_age_filter() {
    let dir = temp_dir("recent_rejections_survive_the_age_filter");
    let mut store = SqliteStore::open(&dir).expect("open store");
    store
        .create_lane(&LaneName::try_new("main").expect("name"), None, None, None)
        .expect("create lane");

    let s0 = state_of(&mut store, &[("a", "x")], None);
    let t0 = store
        .insert_transition(None, &s0, "main", &intent(0, "recent"), CostRecord::default())
        .expect("propose");
    store
        .set_transition_status(&t0.id, TransitionStatus::Rejected, None)
        .expect("reject");

    let report = store
        .collect_garbage(&GcOptions { dry_run: false, max_age_days: 30 })
        .expect("sweep");
    assert_eq!(report.deleted_transitions, 0);
    assert!(store.state_exists(&s0).expect("state kept while the rejection is young"));
}

#[test]
fn sweep_unlinks_spilled_files_and_prunes_the_stat_cache() {
    let dir = temp_dir("sweep_unlinks_spilled_files");
    let limits = StoreLimits { blob_threshold: 8, ..StoreLimits::default() };
    let mut store = SqliteStore::open_with_limits(&dir, limits).expect("open store");
    store
        .create_lane(&LaneName::try_new("main").expect("name"), None, None, None)
        .expect("create lane");

    let big = vec![9u8; 64];
    let hash = store.put_blob(&big).expect("spilled blob");
    store
        .update_stat_cache("/ws/big.bin", 123, big.len() as i64, &hash)
        .expect("cache row");
    let fan_out = dir.join("blobs").join(&hash[..2]).join(&hash[2..4]).join(&hash);
    assert!(fan_out.is_file());

    // Unreferenced by any state: swept immediately.
    let report = store
        .collect_garbage(&GcOptions { dry_run: false, max_age_days: 0 })
        .expect("sweep");
    assert_eq!(report.deleted_objects, 1);
    assert_eq!(report.deleted_bytes, 64);
    assert_eq!(report.pruned_cache, 1);
    assert!(!fan_out.exists(), "spill file unlinked after commit");
    assert_eq!(
        store.check_stat_cache("/ws/big.bin", 123, 64).expect("cache"),
        None
    );
}

#[test]
fn orphaned_spill_files_are_cleaned_on_the_next_run() {
    let dir = temp_dir("orphaned_spill_files_are_cleaned");
    let mut store = SqliteStore::open(&dir).expect("open store");

    // Simulate a crash between the sweep commit and the unlink pass: a
    // fan-out file exists with no object row behind it.
    let hash = fl_core::hash::sha256_hex(b"ghost");
    let ghost = dir.join("blobs").join(&hash[..2]).join(&hash[2..4]).join(&hash);
    std::fs::create_dir_all(ghost.parent().expect("parent")).expect("mkdir");
    std::fs::write(&ghost, b"ghost").expect("write ghost");

    store
        .collect_garbage(&GcOptions { dry_run: false, max_age_days: 0 })
        .expect("sweep");
    assert!(!ghost.exists(), "orphan file detected and removed");
}
