#![forbid(unsafe_code)]
//! Canonical JSON: the deterministic byte encoding object identity hashes.
//!
//! Rules: UTF-8, object keys sorted, `,`/`:` separators with no
//! insignificant whitespace. `serde_json::Value` objects are backed by a
//! `BTreeMap`, so building documents as `Value` and serializing compactly
//! yields exactly that encoding.

use crate::model::{EntryKind, TreeEntry};
use serde_json::{Value, json};

/// Serialize a value to canonical bytes.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    // Compact serialization of a Value cannot fail.
    serde_json::to_vec(value).unwrap_or_default()
}

/// Canonical document for a tree: a JSON array of `[name, kind, hash, mode]`
/// rows. The caller guarantees entries are sorted by name and free of
/// duplicates; encoding does not re-sort.
pub fn tree_document(entries: &[TreeEntry]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|e| json!([e.name, e.kind.as_str(), e.hash, e.mode]))
            .collect(),
    )
}

pub fn tree_bytes(entries: &[TreeEntry]) -> Vec<u8> {
    to_canonical_bytes(&tree_document(entries))
}

/// Decode a canonical tree document back into entries.
pub fn parse_tree(bytes: &[u8]) -> Result<Vec<TreeEntry>, CanonicalError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|_| CanonicalError::Malformed)?;
    let rows = value.as_array().ok_or(CanonicalError::Malformed)?;
    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let fields = row.as_array().ok_or(CanonicalError::Malformed)?;
        if fields.len() != 4 {
            return Err(CanonicalError::Malformed);
        }
        let name = fields[0].as_str().ok_or(CanonicalError::Malformed)?;
        let kind = fields[1]
            .as_str()
            .and_then(EntryKind::parse)
            .ok_or(CanonicalError::Malformed)?;
        let hash = fields[2].as_str().ok_or(CanonicalError::Malformed)?;
        let mode = fields[3].as_u64().ok_or(CanonicalError::Malformed)? as u32;
        entries.push(TreeEntry { name: name.to_string(), kind, hash: hash.to_string(), mode });
    }
    Ok(entries)
}

/// Canonical document for a world state. Key order (`created_at`,
/// `parent_id`, `root_tree`) falls out of the sorted-map encoding.
pub fn state_document(root_tree: &str, parent_id: Option<&str>, created_at: i64) -> Value {
    json!({
        "created_at": created_at,
        "parent_id": parent_id,
        "root_tree": root_tree,
    })
}

pub fn state_bytes(root_tree: &str, parent_id: Option<&str>, created_at: i64) -> Vec<u8> {
    to_canonical_bytes(&state_document(root_tree, parent_id, created_at))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CanonicalError {
    Malformed,
}

impl std::fmt::Display for CanonicalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed canonical document"),
        }
    }
}

impl std::error::Error for CanonicalError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DEFAULT_FILE_MODE;

    #[test]
    fn keys_are_sorted_and_compact() {
        let bytes = state_bytes("aaaa", Some("bbbb"), 7);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"created_at":7,"parent_id":"bbbb","root_tree":"aaaa"}"#
        );
    }

    #[test]
    fn genesis_state_encodes_null_parent() {
        let bytes = state_bytes("aaaa", None, 0);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"created_at":0,"parent_id":null,"root_tree":"aaaa"}"#
        );
    }

    #[test]
    fn tree_round_trip_is_byte_identical() {
        let entries = vec![
            TreeEntry::blob("a.txt", "11", DEFAULT_FILE_MODE),
            TreeEntry::tree("src", "22"),
        ];
        let bytes = tree_bytes(&entries);
        let parsed = parse_tree(&bytes).unwrap();
        assert_eq!(parsed, entries);
        assert_eq!(tree_bytes(&parsed), bytes);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_tree(b"{}"), Err(CanonicalError::Malformed));
        assert_eq!(parse_tree(b"[[\"a\",\"blob\",\"11\"]]"), Err(CanonicalError::Malformed));
    }
}
