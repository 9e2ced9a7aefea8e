#![forbid(unsafe_code)]

use super::super::super::super::StoreError;
use super::util::add_column_if_missing;
use rusqlite::Connection;

/// Databases created before blob spilling and cached subtree depths lack
/// these columns.
pub(super) fn apply(conn: &Connection) -> Result<(), StoreError> {
    add_column_if_missing(conn, "objects", "location", "TEXT DEFAULT NULL")?;
    add_column_if_missing(conn, "objects", "depth", "INTEGER NOT NULL DEFAULT 0")?;
    Ok(())
}
