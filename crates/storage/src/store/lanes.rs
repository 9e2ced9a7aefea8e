#![forbid(unsafe_code)]

use super::*;
use fl_core::ids::LaneName;
use fl_core::model::LaneInfo;
use rusqlite::{OptionalExtension, Row, Transaction, params};
use serde_json::{Map, Value};

fn lane_from_row(row: &Row<'_>) -> rusqlite::Result<(String, Option<String>, Option<String>, i64, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn build_lane(
    (name, head_state, fork_base, created_at_ms, metadata): (
        String,
        Option<String>,
        Option<String>,
        i64,
        Option<String>,
    ),
) -> LaneInfo {
    LaneInfo {
        name,
        head_state,
        fork_base,
        created_at: created_at_ms,
        metadata: parse_or_default::<Map<String, Value>>(metadata.as_deref()),
    }
}

impl SqliteStore {
    pub fn create_lane(
        &mut self,
        name: &LaneName,
        head_state: Option<&str>,
        fork_base: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<LaneInfo, StoreError> {
        for state in [head_state, fork_base].into_iter().flatten() {
            if !self.state_exists(state)? {
                return Err(StoreError::NotFound { entity: "state", id: state.to_string() });
            }
        }

        let now = now_ms();
        let metadata = metadata.unwrap_or_default();
        let metadata_json = to_json(&metadata);
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO lanes(name, head_state, fork_base, created_at_ms, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name.as_str(), head_state, fork_base, now, metadata_json],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists {
                entity: "lane",
                id: name.as_str().to_string(),
            });
        }
        Ok(LaneInfo {
            name: name.as_str().to_string(),
            head_state: head_state.map(str::to_string),
            fork_base: fork_base.map(str::to_string),
            created_at: now,
            metadata,
        })
    }

    pub fn get_lane(&self, name: &str) -> Result<LaneInfo, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT name, head_state, fork_base, created_at_ms, metadata FROM lanes WHERE name=?1",
                params![name],
                lane_from_row,
            )
            .optional()?;
        match row {
            Some(fields) => Ok(build_lane(fields)),
            None => Err(StoreError::NotFound { entity: "lane", id: name.to_string() }),
        }
    }

    pub fn lane_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM lanes WHERE name=?1", params![name], |_| Ok(()))
            .optional()?
            .is_some())
    }

    pub fn lane_head(&self, name: &str) -> Result<Option<String>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT head_state FROM lanes WHERE name=?1",
                params![name],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        match row {
            Some(head) => Ok(head),
            None => Err(StoreError::NotFound { entity: "lane", id: name.to_string() }),
        }
    }

    pub fn list_lanes(&self) -> Result<Vec<LaneInfo>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, head_state, fork_base, created_at_ms, metadata
             FROM lanes ORDER BY created_at_ms, name",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(build_lane(lane_from_row(row)?));
        }
        Ok(out)
    }

    /// Direct head mutation. Accept advances heads atomically on its own;
    /// this exists for the import surface and for tests.
    pub fn set_lane_head(&mut self, name: &str, state: Option<&str>) -> Result<(), StoreError> {
        if let Some(state) = state
            && !self.state_exists(state)?
        {
            return Err(StoreError::NotFound { entity: "state", id: state.to_string() });
        }
        let updated = self.conn.execute(
            "UPDATE lanes SET head_state=?2 WHERE name=?1",
            params![name, state],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound { entity: "lane", id: name.to_string() });
        }
        Ok(())
    }

    /// Delete a lane. Without `force` the lane must have no transitions;
    /// with it the lane row goes away and its transitions stay behind as
    /// plain history (GC ages the rejected ones out).
    pub fn delete_lane(&mut self, name: &str, force: bool) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        if !lane_exists_tx(&tx, name)? {
            return Err(StoreError::NotFound { entity: "lane", id: name.to_string() });
        }
        if !force {
            let referenced = tx
                .query_row(
                    "SELECT 1 FROM transitions WHERE lane=?1 LIMIT 1",
                    params![name],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if referenced {
                return Err(StoreError::InvalidInput(
                    "lane has recorded transitions; pass force to delete it anyway",
                ));
            }
        }
        let deleted = tx.execute("DELETE FROM lanes WHERE name=?1", params![name])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Read-modify-write the lane metadata document. Budgets live here
    /// under the `budget` key.
    pub fn update_lane_metadata(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Map<String, Value>),
    ) -> Result<LaneInfo, StoreError> {
        let tx = self.conn.transaction()?;
        let raw = tx
            .query_row(
                "SELECT metadata FROM lanes WHERE name=?1",
                params![name],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Err(StoreError::NotFound { entity: "lane", id: name.to_string() });
        };
        let mut metadata: Map<String, Value> = parse_or_default(raw.as_deref());
        f(&mut metadata);
        tx.execute(
            "UPDATE lanes SET metadata=?2 WHERE name=?1",
            params![name, to_json(&metadata)],
        )?;
        tx.commit()?;
        self.get_lane(name)
    }
}

pub(super) fn lane_exists_tx(tx: &Transaction<'_>, name: &str) -> Result<bool, StoreError> {
    Ok(tx
        .query_row("SELECT 1 FROM lanes WHERE name=?1", params![name], |_| Ok(()))
        .optional()?
        .is_some())
}
