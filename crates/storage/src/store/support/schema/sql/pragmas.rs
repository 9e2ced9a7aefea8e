#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA busy_timeout=30000;
"#;
