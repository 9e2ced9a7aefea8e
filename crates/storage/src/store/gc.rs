#![forbid(unsafe_code)]
//! Mark-and-sweep over the object tables. Never runs automatically.

use super::*;
use fl_core::canonical;
use fl_core::model::EntryKind;
use rusqlite::{OptionalExtension, Transaction, TransactionBehavior, params};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, warn};

const MS_PER_DAY: i64 = 86_400_000;

#[derive(Clone, Copy, Debug)]
pub struct GcOptions {
    pub dry_run: bool,
    pub max_age_days: i64,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self { dry_run: true, max_age_days: 30 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    pub reachable: usize,
    pub deleted_objects: usize,
    pub deleted_bytes: u64,
    pub deleted_states: usize,
    pub deleted_transitions: usize,
    pub pruned_cache: usize,
    pub dry_run: bool,
    pub elapsed_ms: u64,
}

impl SqliteStore {
    /// Mark everything reachable from lane heads, fork bases and the
    /// endpoint states of surviving transitions, then sweep the rest.
    /// Database deletes commit in one transaction; spilled blob files are
    /// unlinked afterwards, and files orphaned by a crash between the two
    /// steps are picked up on the next run.
    pub fn collect_garbage(&mut self, options: &GcOptions) -> Result<GcReport, StoreError> {
        let start = Instant::now();
        let cutoff_ms = now_ms() - options.max_age_days.max(0) * MS_PER_DAY;

        // The deferred transaction pins a consistent snapshot: an accept
        // committing mid-scan either lands before the snapshot (and is
        // walked) or after (and the next run sees it).
        let (marked, live_states) = {
            let tx = self.conn.transaction()?;
            let result = mark_phase(&tx, cutoff_ms)?;
            tx.commit()?;
            result
        };

        let mut object_meta: HashMap<String, (i64, bool)> = HashMap::new();
        {
            let mut stmt = self.conn.prepare("SELECT hash, size, location FROM objects")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let hash: String = row.get(0)?;
                let size: i64 = row.get(1)?;
                let location: Option<String> = row.get(2)?;
                object_meta.insert(hash, (size, location.as_deref() == Some("fs")));
            }
        }

        let unreachable: Vec<String> = object_meta
            .keys()
            .filter(|hash| !marked.contains(*hash))
            .cloned()
            .collect();
        let deleted_bytes: u64 = unreachable
            .iter()
            .map(|hash| object_meta[hash].0.max(0) as u64)
            .sum();

        let expired_transitions: Vec<String> = {
            let mut stmt = self.conn.prepare(
                "SELECT id FROM transitions WHERE status = 'rejected' AND created_at_ms <= ?1",
            )?;
            let mut rows = stmt.query(params![cutoff_ms])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row.get(0)?);
            }
            out
        };

        let orphan_states: Vec<String> = {
            let mut stmt = self.conn.prepare("SELECT id FROM states")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                if !live_states.contains(&id) {
                    out.push(id);
                }
            }
            out
        };

        let stale_cache_paths: Vec<String> = {
            let mut stmt = self.conn.prepare("SELECT path, blob_hash FROM stat_cache")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let path: String = row.get(0)?;
                let blob_hash: String = row.get(1)?;
                if !marked.contains(&blob_hash) {
                    out.push(path);
                }
            }
            out
        };

        let report = GcReport {
            reachable: marked.len(),
            deleted_objects: unreachable.len(),
            deleted_bytes,
            deleted_states: orphan_states.len(),
            deleted_transitions: expired_transitions.len(),
            pruned_cache: stale_cache_paths.len(),
            dry_run: options.dry_run,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        if options.dry_run {
            return Ok(report);
        }

        let spilled: Vec<String> = unreachable
            .iter()
            .filter(|hash| object_meta[*hash].1)
            .cloned()
            .collect();

        {
            let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for hash in &unreachable {
                tx.execute("DELETE FROM objects WHERE hash=?1", params![hash])?;
            }
            for id in &expired_transitions {
                tx.execute("DELETE FROM transitions WHERE id=?1", params![id])?;
            }
            tx.execute(
                "DELETE FROM intents WHERE id NOT IN (SELECT DISTINCT intent_id FROM transitions)",
                [],
            )?;
            for id in &orphan_states {
                tx.execute("DELETE FROM states WHERE id=?1", params![id])?;
            }
            for path in &stale_cache_paths {
                tx.execute("DELETE FROM stat_cache WHERE path=?1", params![path])?;
            }
            tx.commit()?;
        }

        for hash in &spilled {
            if let Err(err) = self.delete_fs_blob(hash) {
                warn!(%hash, error = %err, "failed to remove spilled blob during sweep");
            }
        }
        self.sweep_orphan_spill_files()?;

        Ok(GcReport { elapsed_ms: start.elapsed().as_millis() as u64, ..report })
    }

    /// Remove fan-out files whose rows are gone: leftovers of a crash
    /// between the sweep commit and the filesystem pass.
    fn sweep_orphan_spill_files(&self) -> Result<(), StoreError> {
        let blobs_dir = self.blobs_dir();
        if !blobs_dir.is_dir() {
            return Ok(());
        }
        for level1 in std::fs::read_dir(&blobs_dir)? {
            let level1 = level1?.path();
            if !level1.is_dir() {
                continue;
            }
            for level2 in std::fs::read_dir(&level1)? {
                let level2 = level2?.path();
                if !level2.is_dir() {
                    continue;
                }
                for file in std::fs::read_dir(&level2)? {
                    let file = file?.path();
                    let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if !fl_core::hash::is_hash(name) {
                        continue;
                    }
                    if !self.object_exists(name)? {
                        debug!(hash = %name, "removing orphaned spill file");
                        let _ = std::fs::remove_file(&file);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Seed and walk the live set inside one read transaction. Returns the
/// marked object hashes (trees and blobs) and the live state ids.
fn mark_phase(
    tx: &Transaction<'_>,
    cutoff_ms: i64,
) -> Result<(HashSet<String>, HashSet<String>), StoreError> {
    let mut live_states: HashSet<String> = HashSet::new();

    {
        let mut stmt = tx.prepare("SELECT head_state, fork_base FROM lanes")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for index in 0..2usize {
                if let Some(id) = row.get::<_, Option<String>>(index)? {
                    live_states.insert(id);
                }
            }
        }
    }
    {
        let mut stmt = tx.prepare(
            "SELECT from_state, to_state FROM transitions
             WHERE status != 'rejected' OR created_at_ms > ?1",
        )?;
        let mut rows = stmt.query(params![cutoff_ms])?;
        while let Some(row) = rows.next()? {
            for index in 0..2usize {
                if let Some(id) = row.get::<_, Option<String>>(index)? {
                    live_states.insert(id);
                }
            }
        }
    }

    // Full lineage: live states keep their ancestors alive.
    let mut frontier: Vec<String> = live_states.iter().cloned().collect();
    while let Some(id) = frontier.pop() {
        let parent = tx
            .query_row(
                "SELECT parent_id FROM states WHERE id=?1",
                params![id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        if let Some(parent) = parent
            && live_states.insert(parent.clone())
        {
            frontier.push(parent);
        }
    }

    let mut root_trees: Vec<String> = Vec::new();
    for id in &live_states {
        let root = tx
            .query_row(
                "SELECT root_tree FROM states WHERE id=?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        if let Some(root) = root {
            root_trees.push(root);
        }
    }

    let mut marked: HashSet<String> = HashSet::new();
    let mut tree_frontier = root_trees;
    while let Some(tree_hash) = tree_frontier.pop() {
        if !marked.insert(tree_hash.clone()) {
            continue;
        }
        let data = tx
            .query_row(
                "SELECT data FROM objects WHERE hash=?1 AND kind='tree'",
                params![tree_hash],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        let Some(data) = data else {
            warn!(hash = %tree_hash, "live tree missing from object table");
            continue;
        };
        let entries = match canonical::parse_tree(&data) {
            Ok(entries) => entries,
            Err(_) => {
                warn!(hash = %tree_hash, "skipping undecodable tree during mark");
                continue;
            }
        };
        for entry in entries {
            match entry.kind {
                EntryKind::Blob => {
                    marked.insert(entry.hash);
                }
                EntryKind::Tree => tree_frontier.push(entry.hash),
            }
        }
    }

    Ok((marked, live_states))
}
