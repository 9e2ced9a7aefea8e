#![forbid(unsafe_code)]

use super::*;
use fl_core::canonical;
use fl_core::hash::sha256_hex;
use fl_core::model::{DEFAULT_DIR_MODE, EntryKind, ObjectKind, TreeEntry};
use rusqlite::{OptionalExtension, params};
use std::collections::BTreeMap;

impl SqliteStore {
    /// Store a directory listing. Entries are sorted by name before
    /// canonicalization; duplicate names are rejected. The tree's depth is
    /// `1 + max(child tree depths)` and must stay within the limit; child
    /// depths come from the `depth` column written when they were stored,
    /// so no recursive walk happens here.
    pub fn put_tree(&mut self, mut entries: Vec<TreeEntry>) -> Result<String, StoreError> {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in entries.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(StoreError::DuplicateEntry { name: pair[0].name.clone() });
            }
        }

        let mut depth: u32 = 1;
        for entry in &entries {
            if entry.kind == EntryKind::Tree {
                let child_depth = self.tree_depth(&entry.hash)?;
                depth = depth.max(child_depth + 1);
            }
        }
        if depth > self.limits.max_tree_depth {
            return Err(StoreError::TreeTooDeep { depth, limit: self.limits.max_tree_depth });
        }

        let bytes = canonical::tree_bytes(&entries);
        let hash = sha256_hex(&bytes);
        if self.object_exists(&hash)? {
            return Ok(hash);
        }

        self.conn.execute(
            "INSERT OR IGNORE INTO objects(hash, kind, data, size, depth, created_at_ms)
             VALUES (?1, 'tree', ?2, ?3, ?4, ?5)",
            params![hash, bytes, bytes.len() as i64, depth as i64, now_ms()],
        )?;
        Ok(hash)
    }

    pub fn get_tree(&self, hash: &str) -> Result<Vec<TreeEntry>, StoreError> {
        let object = self.get_object(hash)?;
        if object.kind != ObjectKind::Tree {
            return Err(StoreError::NotFound { entity: "tree", id: hash.to_string() });
        }
        Ok(canonical::parse_tree(&object.data)?)
    }

    pub(super) fn tree_depth(&self, hash: &str) -> Result<u32, StoreError> {
        let depth = self
            .conn
            .query_row(
                "SELECT depth FROM objects WHERE hash=?1 AND kind='tree'",
                params![hash],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        match depth {
            Some(depth) => Ok(depth as u32),
            None => Err(StoreError::NotFound { entity: "tree", id: hash.to_string() }),
        }
    }

    /// Flatten a tree into `path -> (blob hash, mode)`. Paths are
    /// `/`-joined; directories appear only through their children.
    pub fn flatten_tree(&self, root: &str) -> Result<BTreeMap<String, BlobRef>, StoreError> {
        let mut out = BTreeMap::new();
        self.flatten_into(root, "", &mut out)?;
        Ok(out)
    }

    fn flatten_into(
        &self,
        tree_hash: &str,
        prefix: &str,
        out: &mut BTreeMap<String, BlobRef>,
    ) -> Result<(), StoreError> {
        for entry in self.get_tree(tree_hash)? {
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            match entry.kind {
                EntryKind::Blob => {
                    out.insert(path, BlobRef { hash: entry.hash, mode: entry.mode });
                }
                EntryKind::Tree => self.flatten_into(&entry.hash, &path, out)?,
            }
        }
        Ok(())
    }

    /// Rebuild nested trees from a flat `path -> blob` map and store them
    /// bottom-up, returning the root tree hash. Promotion composes new
    /// target trees this way without touching any workspace.
    pub fn build_tree_from_paths(
        &mut self,
        paths: &BTreeMap<String, BlobRef>,
    ) -> Result<String, StoreError> {
        #[derive(Default)]
        struct Dir {
            files: Vec<(String, BlobRef)>,
            dirs: BTreeMap<String, Dir>,
        }

        let mut root = Dir::default();
        for (path, blob) in paths {
            let mut node = &mut root;
            let mut parts = path.split('/').peekable();
            while let Some(part) = parts.next() {
                if part.is_empty() || part == "." || part == ".." {
                    return Err(StoreError::InvalidInput("tree path contains invalid component"));
                }
                if parts.peek().is_some() {
                    node = node.dirs.entry(part.to_string()).or_default();
                } else {
                    node.files.push((part.to_string(), blob.clone()));
                }
            }
        }

        fn store_dir(store: &mut SqliteStore, dir: &Dir) -> Result<String, StoreError> {
            let mut entries = Vec::with_capacity(dir.files.len() + dir.dirs.len());
            for (name, child) in &dir.dirs {
                let child_hash = store_dir(store, child)?;
                entries.push(TreeEntry {
                    name: name.clone(),
                    kind: EntryKind::Tree,
                    hash: child_hash,
                    mode: DEFAULT_DIR_MODE,
                });
            }
            for (name, blob) in &dir.files {
                entries.push(TreeEntry {
                    name: name.clone(),
                    kind: EntryKind::Blob,
                    hash: blob.hash.clone(),
                    mode: blob.mode,
                });
            }
            store.put_tree(entries)
        }

        store_dir(self, &root)
    }
}
