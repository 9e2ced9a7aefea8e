#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS objects (
          hash TEXT PRIMARY KEY,
          kind TEXT NOT NULL,
          data BLOB NOT NULL,
          size INTEGER NOT NULL,
          depth INTEGER NOT NULL DEFAULT 0,
          created_at_ms INTEGER NOT NULL,
          location TEXT DEFAULT NULL
        );

        CREATE TABLE IF NOT EXISTS states (
          id TEXT PRIMARY KEY,
          root_tree TEXT NOT NULL,
          parent_id TEXT,
          created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stat_cache (
          path TEXT PRIMARY KEY,
          mtime_ns INTEGER NOT NULL,
          size INTEGER NOT NULL,
          blob_hash TEXT NOT NULL
        );
"#;
