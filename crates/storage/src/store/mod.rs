#![forbid(unsafe_code)]
//! Storage implementation (split-friendly module root).

mod blobs;
mod diff;
mod error;
mod gc;
mod history;
mod lanes;
mod spill;
mod stat_cache;
mod states;
mod support;
mod transitions;
mod trees;
mod types;

use fl_core::model::{DEFAULT_MAX_BLOB_SIZE, DEFAULT_MAX_TREE_DEPTH};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

pub use error::StoreError;
pub use gc::{GcOptions, GcReport};
pub use types::*;

use support::*;

use lanes::lane_exists_tx;
use transitions::transition_from_row;

/// Database file name inside the state directory.
const DB_FILE: &str = "store.db";

/// Ingest limits, resolved from the repository configuration before the
/// store is opened. Zero-valued config fields become these defaults.
#[derive(Clone, Copy, Debug)]
pub struct StoreLimits {
    pub max_blob_size: u64,
    pub max_tree_depth: u32,
    /// Blobs strictly larger than this spill to fan-out files; 0 keeps
    /// every blob inlined in the database.
    pub blob_threshold: u64,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH,
            blob_threshold: 0,
        }
    }
}

/// SQLite-backed content store and ledger.
///
/// Not safe for concurrent use from multiple threads: create one store per
/// thread. Distinct handles may share the same database file; WAL mode and
/// the 30 s busy timeout arbitrate between them.
#[derive(Debug)]
pub struct SqliteStore {
    state_dir: PathBuf,
    conn: Connection,
    limits: StoreLimits,
    in_batch: bool,
}

impl SqliteStore {
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_limits(state_dir, StoreLimits::default())
    }

    pub fn open_with_limits(
        state_dir: impl AsRef<Path>,
        limits: StoreLimits,
    ) -> Result<Self, StoreError> {
        let state_dir = state_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&state_dir)?;
        let conn = Connection::open(state_dir.join(DB_FILE))?;
        let store = Self { state_dir, conn, limits, in_batch: false };
        migrate_sqlite_schema(&store.conn)?;
        Ok(store)
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub(crate) fn blobs_dir(&self) -> PathBuf {
        self.state_dir.join("blobs")
    }

    /// Run `f` inside one write transaction. Object puts issued inside the
    /// closure commit together; a snapshot of ten thousand files costs one
    /// fsync instead of ten thousand. Nested calls pass through. Ledger
    /// operations open their own transactions and must stay outside.
    pub fn batch<T, E>(
        &mut self,
        f: impl FnOnce(&mut SqliteStore) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        if self.in_batch {
            return f(self);
        }
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|err| E::from(StoreError::Sql(err)))?;
        self.in_batch = true;
        let result = f(self);
        self.in_batch = false;
        match result {
            Ok(value) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(|err| E::from(StoreError::Sql(err)))?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }

    /// Storage statistics grouped by object kind.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let (total_objects, total_bytes) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM objects",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let mut by_kind = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT kind, COUNT(*), COALESCE(SUM(size), 0) FROM objects GROUP BY kind ORDER BY kind",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                by_kind.push(KindStats {
                    kind: row.get(0)?,
                    count: row.get(1)?,
                    bytes: row.get(2)?,
                });
            }
        }
        let states = self
            .conn
            .query_row("SELECT COUNT(*) FROM states", [], |row| row.get::<_, i64>(0))?;
        by_kind.push(KindStats { kind: "state".to_string(), count: states, bytes: 0 });
        Ok(StoreStats { total_objects, total_bytes, by_kind })
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, err)| StoreError::Sql(err))
    }
}
