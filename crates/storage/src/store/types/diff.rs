#![forbid(unsafe_code)]

use std::collections::BTreeMap;

/// A flattened tree leaf: blob hash plus recorded mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobRef {
    pub hash: String,
    pub mode: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangedBlob {
    pub before: BlobRef,
    pub after: BlobRef,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffAction {
    Added,
    Removed,
    Modified,
}

impl DiffAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
        }
    }
}

/// Path-keyed three-set difference between two trees. Paths are
/// `/`-joined relative file paths; directories never appear directly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateDiff {
    pub added: BTreeMap<String, BlobRef>,
    pub removed: BTreeMap<String, BlobRef>,
    pub modified: BTreeMap<String, ChangedBlob>,
    pub unchanged: usize,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn action_for(&self, path: &str) -> Option<DiffAction> {
        if self.added.contains_key(path) {
            Some(DiffAction::Added)
        } else if self.removed.contains_key(path) {
            Some(DiffAction::Removed)
        } else if self.modified.contains_key(path) {
            Some(DiffAction::Modified)
        } else {
            None
        }
    }

    /// The resulting content at `path` after this diff, if the diff touches
    /// it and leaves it present.
    pub fn outcome_for(&self, path: &str) -> Option<&BlobRef> {
        self.added
            .get(path)
            .or_else(|| self.modified.get(path).map(|c| &c.after))
    }

    pub fn touched_paths(&self) -> impl Iterator<Item = &String> {
        self.added
            .keys()
            .chain(self.removed.keys())
            .chain(self.modified.keys())
    }
}
