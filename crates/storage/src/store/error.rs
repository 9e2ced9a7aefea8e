#![forbid(unsafe_code)]

use fl_core::ids::NameError;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    InvalidName(NameError),
    NotFound {
        entity: &'static str,
        id: String,
    },
    AlreadyExists {
        entity: &'static str,
        id: String,
    },
    DuplicateEntry {
        name: String,
    },
    BlobTooLarge {
        size: u64,
        limit: u64,
    },
    TreeTooDeep {
        depth: u32,
        limit: u32,
    },
    IntegrityMismatch {
        expected: String,
        actual: String,
    },
    /// A spilled blob's database row exists but its fan-out file is gone.
    SpillMissing {
        hash: String,
    },
    IllegalStatusChange {
        from: &'static str,
        to: &'static str,
    },
    CostFrozen {
        status: &'static str,
    },
    /// The lane head moved between propose and accept. Nothing was mutated;
    /// the caller should re-snapshot from the current head.
    StaleProposal {
        lane: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    CorruptedLedger {
        message: String,
    },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::Sql(_) => "INTERNAL",
            Self::InvalidInput(_) | Self::InvalidName(_) => "INVALID_INPUT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::DuplicateEntry { .. } => "DUPLICATE_ENTRY",
            Self::BlobTooLarge { .. } => "BLOB_TOO_LARGE",
            Self::TreeTooDeep { .. } => "TREE_TOO_DEEP",
            Self::IntegrityMismatch { .. } => "INTEGRITY_MISMATCH",
            Self::SpillMissing { .. } => "INTEGRITY_MISMATCH",
            Self::IllegalStatusChange { .. } => "ILLEGAL_STATUS_CHANGE",
            Self::CostFrozen { .. } => "COST_FROZEN",
            Self::StaleProposal { .. } => "STALE_PROPOSAL",
            Self::CorruptedLedger { .. } => "CORRUPTED_LEDGER",
        }
    }

    pub fn recovery_hint(&self) -> Option<&'static str> {
        match self {
            Self::StaleProposal { .. } => {
                Some("lane head advanced concurrently: re-snapshot from the current head and re-propose")
            }
            Self::SpillMissing { .. } => {
                Some("pull the object from a remote, or run gc to drop dangling references")
            }
            Self::BlobTooLarge { .. } => Some("raise max_blob_size in config.json or exclude the file"),
            Self::TreeTooDeep { .. } => Some("raise max_tree_depth in config.json"),
            Self::NotFound { .. } => Some("create the required entity first"),
            Self::AlreadyExists { .. } => Some("use a different identifier or delete the existing record"),
            _ => None,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::InvalidName(err) => write!(f, "invalid name: {err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::AlreadyExists { entity, id } => write!(f, "{entity} already exists: {id}"),
            Self::DuplicateEntry { name } => write!(f, "duplicate tree entry name: {name}"),
            Self::BlobTooLarge { size, limit } => {
                write!(f, "blob size {size} bytes exceeds limit of {limit} bytes")
            }
            Self::TreeTooDeep { depth, limit } => {
                write!(f, "tree depth {depth} exceeds limit of {limit}")
            }
            Self::IntegrityMismatch { expected, actual } => {
                write!(f, "integrity mismatch: expected {expected}, computed {actual}")
            }
            Self::SpillMissing { hash } => write!(f, "spilled blob file missing for {hash}"),
            Self::IllegalStatusChange { from, to } => {
                write!(f, "illegal transition status change: {from} -> {to}")
            }
            Self::CostFrozen { status } => {
                write!(f, "cost is frozen once a transition is {status}")
            }
            Self::StaleProposal { lane, expected, actual } => write!(
                f,
                "stale proposal on lane '{lane}': expected head {expected:?}, found {actual:?}"
            ),
            Self::CorruptedLedger { message } => write!(f, "corrupted ledger: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<NameError> for StoreError {
    fn from(value: NameError) -> Self {
        Self::InvalidName(value)
    }
}

impl From<fl_core::canonical::CanonicalError> for StoreError {
    fn from(value: fl_core::canonical::CanonicalError) -> Self {
        Self::CorruptedLedger { message: value.to_string() }
    }
}
