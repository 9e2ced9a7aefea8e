#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS intents (
          id TEXT PRIMARY KEY,
          prompt TEXT NOT NULL,
          agent_json TEXT NOT NULL,
          context_refs TEXT NOT NULL DEFAULT '[]',
          tags TEXT NOT NULL DEFAULT '[]',
          metadata TEXT NOT NULL DEFAULT '{}',
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transitions (
          id TEXT PRIMARY KEY,
          from_state TEXT,
          to_state TEXT NOT NULL,
          intent_id TEXT NOT NULL,
          lane TEXT NOT NULL,
          status TEXT NOT NULL DEFAULT 'proposed',
          eval_json TEXT,
          cost_json TEXT NOT NULL DEFAULT '{}',
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lanes (
          name TEXT PRIMARY KEY,
          head_state TEXT,
          fork_base TEXT,
          created_at_ms INTEGER NOT NULL,
          metadata TEXT NOT NULL DEFAULT '{}'
        );
"#;
