#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE INDEX IF NOT EXISTS idx_objects_kind ON objects(kind);
        CREATE INDEX IF NOT EXISTS idx_states_parent ON states(parent_id);
        CREATE INDEX IF NOT EXISTS idx_states_identity ON states(root_tree, parent_id);
        CREATE INDEX IF NOT EXISTS idx_transitions_lane ON transitions(lane, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_transitions_status ON transitions(status);
        CREATE INDEX IF NOT EXISTS idx_transitions_from ON transitions(from_state);
        CREATE INDEX IF NOT EXISTS idx_transitions_to ON transitions(to_state);
        CREATE INDEX IF NOT EXISTS idx_intents_created ON intents(created_at_ms);
"#;
