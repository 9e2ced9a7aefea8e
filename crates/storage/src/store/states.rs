#![forbid(unsafe_code)]

use super::*;
use fl_core::canonical;
use fl_core::hash::sha256_hex;
use fl_core::model::WorldState;
use rusqlite::{OptionalExtension, params};
use std::collections::HashSet;

impl SqliteStore {
    /// Create (or find) a world state for `root_tree` with the given
    /// parent. An existing state with the same `(root_tree, parent_id)`
    /// pair is returned as-is: two snapshots of byte-identical trees from
    /// the same base yield the same state id even though fresh ids hash a
    /// creation timestamp.
    pub fn put_state(
        &mut self,
        root_tree: &str,
        parent_id: Option<&str>,
    ) -> Result<String, StoreError> {
        self.tree_depth(root_tree)?;
        if let Some(parent) = parent_id
            && !self.state_exists(parent)?
        {
            return Err(StoreError::NotFound { entity: "state", id: parent.to_string() });
        }

        let existing = self
            .conn
            .query_row(
                "SELECT id FROM states WHERE root_tree=?1 AND parent_id IS ?2",
                params![root_tree, parent_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let created_at = now_secs();
        let bytes = canonical::state_bytes(root_tree, parent_id, created_at);
        let id = sha256_hex(&bytes);
        self.conn.execute(
            "INSERT OR IGNORE INTO states(id, root_tree, parent_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, root_tree, parent_id, created_at],
        )?;
        Ok(id)
    }

    /// Insert a fully-formed state row, idempotent on id. The id must be
    /// the digest of the state's canonical document; used by the sync
    /// surface, which receives states minted elsewhere. The parent may be
    /// absent locally (its lineage is pulled separately).
    pub fn insert_state(&mut self, state: &WorldState) -> Result<(), StoreError> {
        let bytes = canonical::state_bytes(
            &state.root_tree,
            state.parent_id.as_deref(),
            state.created_at,
        );
        let actual = sha256_hex(&bytes);
        if actual != state.id {
            return Err(StoreError::IntegrityMismatch { expected: state.id.clone(), actual });
        }
        self.tree_depth(&state.root_tree)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO states(id, root_tree, parent_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![state.id, state.root_tree, state.parent_id, state.created_at],
        )?;
        Ok(())
    }

    pub fn get_state(&self, id: &str) -> Result<WorldState, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT root_tree, parent_id, created_at FROM states WHERE id=?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((root_tree, parent_id, created_at)) => Ok(WorldState {
                id: id.to_string(),
                root_tree,
                parent_id,
                created_at,
            }),
            None => Err(StoreError::NotFound { entity: "state", id: id.to_string() }),
        }
    }

    pub fn state_exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM states WHERE id=?1", params![id], |_| Ok(()))
            .optional()?
            .is_some())
    }

    /// The canonical bytes a state id was derived from, re-encoded from
    /// the row. Used by integrity checks and the sync surface.
    pub fn state_canonical_bytes(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let state = self.get_state(id)?;
        Ok(canonical::state_bytes(
            &state.root_tree,
            state.parent_id.as_deref(),
            state.created_at,
        ))
    }

    /// The ancestor chain of `id`, starting at `id` itself. The DAG is
    /// acyclic by construction; the visited guard only protects against a
    /// corrupted ledger.
    pub fn ancestors(&self, id: &str) -> Result<Vec<String>, StoreError> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(id.to_string());
        while let Some(state_id) = current {
            if !visited.insert(state_id.clone()) {
                return Err(StoreError::CorruptedLedger {
                    message: format!("parent cycle through state {state_id}"),
                });
            }
            let state = self.get_state(&state_id)?;
            chain.push(state_id);
            current = state.parent_id;
        }
        Ok(chain)
    }

    /// Lowest common ancestor of two states over the parent chains, or
    /// None when the histories are disjoint.
    pub fn common_ancestor(&self, a: &str, b: &str) -> Result<Option<String>, StoreError> {
        let seen: HashSet<String> = self.ancestors(a)?.into_iter().collect();
        let mut current = Some(b.to_string());
        while let Some(state_id) = current {
            if seen.contains(&state_id) {
                return Ok(Some(state_id));
            }
            current = self.get_state(&state_id)?.parent_id;
        }
        Ok(None)
    }
}
