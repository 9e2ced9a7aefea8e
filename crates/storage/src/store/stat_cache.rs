#![forbid(unsafe_code)]
//! Snapshot fast path: `(path, mtime_ns, size)` already seen means the
//! blob hash is known without re-reading the file.

use super::*;
use rusqlite::{OptionalExtension, params};

impl SqliteStore {
    pub fn check_stat_cache(
        &self,
        path: &str,
        mtime_ns: i64,
        size: i64,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT blob_hash FROM stat_cache WHERE path=?1 AND mtime_ns=?2 AND size=?3",
                params![path, mtime_ns, size],
                |row| row.get::<_, String>(0),
            )
            .optional()?)
    }

    pub fn update_stat_cache(
        &mut self,
        path: &str,
        mtime_ns: i64,
        size: i64,
        blob_hash: &str,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO stat_cache(path, mtime_ns, size, blob_hash)
             VALUES (?1, ?2, ?3, ?4)",
            params![path, mtime_ns, size, blob_hash],
        )?;
        Ok(())
    }
}
