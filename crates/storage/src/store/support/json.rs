#![forbid(unsafe_code)]

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serialize a row payload. The row types here contain nothing that can
/// fail to serialize; an empty object is the defensive fallback.
pub(in crate::store) fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

/// Parse a JSON column, treating NULL, empty and malformed text as the
/// type's default.
pub(in crate::store) fn parse_or_default<T: DeserializeOwned + Default>(raw: Option<&str>) -> T {
    match raw {
        Some(text) if !text.is_empty() => serde_json::from_str(text).unwrap_or_default(),
        _ => T::default(),
    }
}

/// Parse a JSON column that must be present and well-formed.
pub(in crate::store) fn parse_required<T: DeserializeOwned>(
    raw: &str,
    what: &str,
) -> Result<T, crate::store::StoreError> {
    serde_json::from_str(raw).map_err(|err| crate::store::StoreError::CorruptedLedger {
        message: format!("{what}: {err}"),
    })
}
