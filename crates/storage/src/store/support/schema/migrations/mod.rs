#![forbid(unsafe_code)]

mod objects;
mod util;

use super::super::super::StoreError;
use rusqlite::Connection;

pub(super) fn apply(conn: &Connection) -> Result<(), StoreError> {
    objects::apply(conn)?;
    Ok(())
}
