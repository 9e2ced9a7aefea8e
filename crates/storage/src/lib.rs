#![forbid(unsafe_code)]
//! Durable storage for the Flanes state substrate.
//!
//! One SQLite database holds both halves of the system: the
//! content-addressed object tables (blobs, trees, states) and the metadata
//! ledger (intents, transitions, lanes), plus the stat cache that speeds
//! up repeated snapshots. The ledger is the only mutable structure; object
//! rows are written once and removed only by the garbage collector.

mod store;

pub use store::StoreError;
pub use store::{GcOptions, GcReport, SqliteStore, StoreLimits};
pub use store::{
    BlobRef, CasObject, ChangedBlob, DiffAction, HistoryEntry, KindStats, SearchHit, StateDiff,
    StoreStats, TraceEntry,
};
