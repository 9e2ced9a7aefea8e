#![forbid(unsafe_code)]

use super::*;

impl SqliteStore {
    /// Path-keyed difference between two trees: which files appear,
    /// disappear, or point at different content/mode. Never reads blob
    /// bytes.
    pub fn diff_trees(&self, from_tree: &str, to_tree: &str) -> Result<StateDiff, StoreError> {
        let before = self.flatten_tree(from_tree)?;
        let after = self.flatten_tree(to_tree)?;

        let mut diff = StateDiff::default();
        for (path, blob) in &after {
            match before.get(path) {
                None => {
                    diff.added.insert(path.clone(), blob.clone());
                }
                Some(old) if old != blob => {
                    diff.modified.insert(
                        path.clone(),
                        ChangedBlob { before: old.clone(), after: blob.clone() },
                    );
                }
                Some(_) => diff.unchanged += 1,
            }
        }
        for (path, blob) in &before {
            if !after.contains_key(path) {
                diff.removed.insert(path.clone(), blob.clone());
            }
        }
        Ok(diff)
    }

    pub fn diff_states(&self, a: &str, b: &str) -> Result<StateDiff, StoreError> {
        let state_a = self.get_state(a)?;
        let state_b = self.get_state(b)?;
        self.diff_trees(&state_a.root_tree, &state_b.root_tree)
    }
}
