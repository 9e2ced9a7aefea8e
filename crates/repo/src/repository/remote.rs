#![forbid(unsafe_code)]
//! Object-level sync against an external backend. Only the adapter
//! contract lives here: a key-value capability over `blobs/`, `trees/`
//! and `states/` prefixes. Concrete backends are external collaborators.
//!
//! Every pulled object is verified against its key before ingestion; a
//! mismatching object is reported and skipped, and anything that depends
//! on it is skipped with it.

use crate::error::RepoError;
use fl_core::canonical;
use fl_core::hash::sha256_hex;
use fl_core::model::{EntryKind, TreeEntry, WorldState};
use fl_storage::SqliteStore;
use std::collections::{HashMap, HashSet};
use tracing::warn;

#[derive(Clone, Debug)]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote: {}", self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Minimal capability a remote object store must offer.
pub trait RemoteStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), RemoteError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;
    fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError>;
    fn delete(&mut self, key: &str) -> Result<(), RemoteError>;
}

#[derive(Clone, Debug, Default)]
pub struct PushReport {
    pub pushed: usize,
    pub skipped_existing: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedObject {
    pub key: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default)]
pub struct PullReport {
    pub fetched: usize,
    pub already_present: usize,
    pub skipped: Vec<SkippedObject>,
}

fn blob_key(hash: &str) -> String {
    format!("blobs/{hash}")
}

fn tree_key(hash: &str) -> String {
    format!("trees/{hash}")
}

fn state_key(id: &str) -> String {
    format!("states/{id}")
}

fn push_object(
    remote: &mut dyn RemoteStore,
    key: &str,
    bytes: &[u8],
    report: &mut PushReport,
) -> Result<(), RemoteError> {
    if remote.get(key)?.is_some() {
        report.skipped_existing += 1;
        return Ok(());
    }
    remote.put(key, bytes)?;
    report.pushed += 1;
    Ok(())
}

/// Upload one state and its full tree/blob closure.
pub fn push_state(
    store: &mut SqliteStore,
    remote: &mut dyn RemoteStore,
    state_id: &str,
) -> Result<PushReport, RepoError> {
    let mut report = PushReport::default();
    let state = store.get_state(state_id)?;

    let mut tree_stack = vec![state.root_tree.clone()];
    let mut seen_trees = HashSet::new();
    let mut blobs = HashSet::new();
    while let Some(tree_hash) = tree_stack.pop() {
        if !seen_trees.insert(tree_hash.clone()) {
            continue;
        }
        let entries = store.get_tree(&tree_hash)?;
        push_object(remote, &tree_key(&tree_hash), &canonical::tree_bytes(&entries), &mut report)?;
        for entry in entries {
            match entry.kind {
                EntryKind::Blob => {
                    blobs.insert(entry.hash);
                }
                EntryKind::Tree => tree_stack.push(entry.hash),
            }
        }
    }
    for blob_hash in blobs {
        let bytes = store.get_blob(&blob_hash)?;
        push_object(remote, &blob_key(&blob_hash), &bytes, &mut report)?;
    }

    let state_bytes = store.state_canonical_bytes(state_id)?;
    push_object(remote, &state_key(state_id), &state_bytes, &mut report)?;
    Ok(report)
}

/// Fetch one state and its closure, verifying every object against its
/// key. A mismatching or missing object is skipped along with anything
/// above it that references it; verified siblings still land.
pub fn pull_state(
    store: &mut SqliteStore,
    remote: &dyn RemoteStore,
    state_id: &str,
) -> Result<PullReport, RepoError> {
    let mut report = PullReport::default();

    if store.state_exists(state_id)? {
        report.already_present += 1;
        return Ok(report);
    }

    let key = state_key(state_id);
    let Some(state_bytes) = remote.get(&key)? else {
        return Err(RepoError::Remote(RemoteError::new(format!("missing object {key}"))));
    };
    let actual = sha256_hex(&state_bytes);
    if actual != state_id {
        report.skipped.push(SkippedObject {
            key,
            reason: format!("digest mismatch: expected {state_id}, computed {actual}"),
        });
        return Ok(report);
    }
    let state = parse_state_document(state_id, &state_bytes)?;

    // Walk the tree closure top-down, remembering entries so trees can
    // be ingested children-first afterwards.
    let mut ordered: Vec<(String, Vec<TreeEntry>)> = Vec::new();
    let mut failed: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut local_trees: HashSet<String> = HashSet::new();
    let mut blobs: Vec<String> = Vec::new();
    let mut stack = vec![state.root_tree.clone()];

    while let Some(tree_hash) = stack.pop() {
        if !visited.insert(tree_hash.clone()) {
            continue;
        }
        if store.has(&tree_hash)? {
            report.already_present += 1;
            local_trees.insert(tree_hash);
            continue;
        }
        let key = tree_key(&tree_hash);
        let Some(bytes) = remote.get(&key)? else {
            report.skipped.push(SkippedObject { key, reason: "missing object".to_string() });
            failed.insert(tree_hash);
            continue;
        };
        let actual = sha256_hex(&bytes);
        if actual != tree_hash {
            report.skipped.push(SkippedObject {
                key,
                reason: format!("digest mismatch: expected {tree_hash}, computed {actual}"),
            });
            failed.insert(tree_hash);
            continue;
        }
        let entries = match canonical::parse_tree(&bytes) {
            Ok(entries) => entries,
            Err(_) => {
                report.skipped.push(SkippedObject { key, reason: "undecodable tree".to_string() });
                failed.insert(tree_hash);
                continue;
            }
        };
        for entry in &entries {
            match entry.kind {
                EntryKind::Blob => blobs.push(entry.hash.clone()),
                EntryKind::Tree => stack.push(entry.hash.clone()),
            }
        }
        ordered.push((tree_hash, entries));
    }

    for blob_hash in blobs {
        if store.has(&blob_hash)? {
            report.already_present += 1;
            continue;
        }
        let key = blob_key(&blob_hash);
        let Some(bytes) = remote.get(&key)? else {
            report.skipped.push(SkippedObject { key, reason: "missing object".to_string() });
            continue;
        };
        if let Err(err) = store.verify(&blob_hash, &bytes) {
            report.skipped.push(SkippedObject { key, reason: err.to_string() });
            continue;
        }
        store.put_blob(&bytes)?;
        report.fetched += 1;
    }

    // Children first: tree ingestion needs child depths on record.
    for (tree_hash, entries) in ordered.into_iter().rev() {
        let broken_child = entries.iter().any(|entry| {
            entry.kind == EntryKind::Tree
                && failed.contains(&entry.hash)
                && !local_trees.contains(&entry.hash)
        });
        if broken_child {
            failed.insert(tree_hash.clone());
            report.skipped.push(SkippedObject {
                key: tree_key(&tree_hash),
                reason: "depends on a skipped subtree".to_string(),
            });
            continue;
        }
        store.put_tree(entries)?;
        report.fetched += 1;
    }

    if failed.contains(&state.root_tree) {
        report.skipped.push(SkippedObject {
            key: state_key(state_id),
            reason: "root tree was skipped".to_string(),
        });
        return Ok(report);
    }

    if let Some(parent) = &state.parent_id
        && !store.state_exists(parent)?
    {
        warn!(state = %state_id, parent = %parent, "pulled state has an absent parent; pull ancestors to complete lineage");
    }
    store.insert_state(&state)?;
    report.fetched += 1;
    Ok(report)
}

fn parse_state_document(id: &str, bytes: &[u8]) -> Result<WorldState, RepoError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let root_tree = value
        .get("root_tree")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RepoError::Remote(RemoteError::new("state document missing root_tree")))?;
    let parent_id = value.get("parent_id").and_then(|v| v.as_str()).map(str::to_string);
    let created_at = value
        .get("created_at")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| RepoError::Remote(RemoteError::new("state document missing created_at")))?;
    Ok(WorldState {
        id: id.to_string(),
        root_tree: root_tree.to_string(),
        parent_id,
        created_at,
    })
}

/// In-memory backend for tests and embedding.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRemote {
    objects: HashMap<String, Vec<u8>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn corrupt(&mut self, key: &str, bytes: &[u8]) {
        self.objects.insert(key.to_string(), bytes.to_vec());
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl RemoteStore for InMemoryRemote {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        self.objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        Ok(self.objects.get(key).cloned())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let mut keys: Vec<String> = self
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn delete(&mut self, key: &str) -> Result<(), RemoteError> {
        self.objects.remove(key);
        Ok(())
    }
}
