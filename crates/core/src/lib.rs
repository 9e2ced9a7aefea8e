#![forbid(unsafe_code)]
//! Shared domain layer for the Flanes state substrate.
//!
//! Everything here is pure data: SHA-256 hashing, the canonical JSON
//! encoding that object identity is derived from, validated lane and
//! workspace names, the model rows the ledger stores, and the repository
//! configuration document. No I/O happens in this crate.

pub mod canonical;
pub mod config;
pub mod hash;
pub mod ids;
pub mod model;
