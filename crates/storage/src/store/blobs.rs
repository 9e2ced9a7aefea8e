#![forbid(unsafe_code)]

use super::*;
use fl_core::hash::sha256_hex;
use fl_core::model::ObjectKind;
use rusqlite::{OptionalExtension, params};

impl SqliteStore {
    /// Store raw file bytes. Idempotent: the hash of already-present
    /// content is returned before the size limit is consulted, so legacy
    /// blobs survive a lowered limit.
    pub fn put_blob(&mut self, content: &[u8]) -> Result<String, StoreError> {
        let hash = sha256_hex(content);

        if self.object_exists(&hash)? {
            return Ok(hash);
        }

        let size = content.len() as u64;
        if size > self.limits.max_blob_size {
            return Err(StoreError::BlobTooLarge { size, limit: self.limits.max_blob_size });
        }

        if self.limits.blob_threshold > 0 && size > self.limits.blob_threshold {
            // File first, then the row. A failed insert must not leave an
            // unreferenced fan-out file behind.
            self.write_fs_blob(&hash, content)?;
            let inserted = self.conn.execute(
                "INSERT OR IGNORE INTO objects(hash, kind, data, size, created_at_ms, location)
                 VALUES (?1, 'blob', x'', ?2, ?3, 'fs')",
                params![hash, size as i64, now_ms()],
            );
            if let Err(err) = inserted {
                let _ = self.delete_fs_blob(&hash);
                return Err(StoreError::Sql(err));
            }
        } else {
            self.conn.execute(
                "INSERT OR IGNORE INTO objects(hash, kind, data, size, created_at_ms)
                 VALUES (?1, 'blob', ?2, ?3, ?4)",
                params![hash, content, size as i64, now_ms()],
            )?;
        }

        Ok(hash)
    }

    pub fn get_blob(&self, hash: &str) -> Result<Vec<u8>, StoreError> {
        let object = self.get_object(hash)?;
        match object.kind {
            ObjectKind::Blob => Ok(object.data),
            _ => Err(StoreError::NotFound { entity: "blob", id: hash.to_string() }),
        }
    }

    pub(super) fn get_object(&self, hash: &str) -> Result<CasObject, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT kind, data, size, location FROM objects WHERE hash=?1",
                params![hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((kind, data, size, location)) = row else {
            return Err(StoreError::NotFound { entity: "object", id: hash.to_string() });
        };
        let kind = ObjectKind::parse(&kind).ok_or_else(|| StoreError::CorruptedLedger {
            message: format!("unknown object kind {kind:?} for {hash}"),
        })?;

        let data = if location.as_deref() == Some("fs") { self.read_fs_blob(hash)? } else { data };

        Ok(CasObject { hash: hash.to_string(), kind, data, size: size as u64 })
    }

    pub(super) fn object_exists(&self, hash: &str) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM objects WHERE hash=?1", params![hash], |_| Ok(()))
            .optional()?
            .is_some())
    }

    /// True when the hash names any stored blob, tree or state.
    pub fn has(&self, hash: &str) -> Result<bool, StoreError> {
        if self.object_exists(hash)? {
            return Ok(true);
        }
        self.state_exists(hash)
    }

    /// All keys of one object kind, unordered.
    pub fn iter_keys(&self, kind: ObjectKind) -> Result<Vec<String>, StoreError> {
        if kind == ObjectKind::State {
            let mut stmt = self.conn.prepare("SELECT id FROM states")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row.get(0)?);
            }
            return Ok(out);
        }
        let mut stmt = self.conn.prepare("SELECT hash FROM objects WHERE kind=?1")?;
        let mut rows = stmt.query(params![kind.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get(0)?);
        }
        Ok(out)
    }

    /// Recompute the digest of `bytes` and compare it to `hash`. Used on
    /// every pull from an external backend before ingesting.
    pub fn verify(&self, hash: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let actual = sha256_hex(bytes);
        if actual != hash {
            return Err(StoreError::IntegrityMismatch { expected: hash.to_string(), actual });
        }
        Ok(())
    }

    /// Remove one object row (and its fan-out file). Reserved for the
    /// garbage collector and sync tooling; ordinary code never deletes.
    pub fn delete(&mut self, hash: &str) -> Result<bool, StoreError> {
        let location = self
            .conn
            .query_row(
                "SELECT location FROM objects WHERE hash=?1",
                params![hash],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        let Some(location) = location else {
            let deleted = self
                .conn
                .execute("DELETE FROM states WHERE id=?1", params![hash])?;
            return Ok(deleted > 0);
        };
        self.conn.execute("DELETE FROM objects WHERE hash=?1", params![hash])?;
        if location.as_deref() == Some("fs") {
            self.delete_fs_blob(hash)?;
        }
        Ok(true)
    }
}
