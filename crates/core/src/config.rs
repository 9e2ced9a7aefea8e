#![forbid(unsafe_code)]

use crate::model::{DEFAULT_MAX_BLOB_SIZE, DEFAULT_MAX_TREE_DEPTH};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version stamp written into freshly initialized repositories.
pub const CONFIG_VERSION: &str = "1.0";

/// Default evaluator timeout, seconds.
pub const DEFAULT_EVALUATOR_TIMEOUT_SECS: u64 = 300;

/// The `config.json` document at `.state/config.json`. Limits use 0 as
/// "take the compile-time default"; negative values are rejected at open.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepoConfig {
    pub version: String,
    pub default_lane: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub max_blob_size: i64,
    #[serde(default)]
    pub max_tree_depth: i64,
    /// Blobs above this size spill to fan-out files; 0 keeps everything
    /// inlined in the database.
    #[serde(default)]
    pub blob_threshold: i64,
    #[serde(default)]
    pub evaluators: Vec<EvaluatorSpec>,
    /// Settings handed verbatim to the configured remote-storage adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_storage: Option<Value>,
    /// Everything else, preserved through load/save. The `embedding_*`
    /// keys of the external semantic-search collaborator live here.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RepoConfig {
    pub fn new(default_lane: impl Into<String>, created_at: i64) -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            default_lane: default_lane.into(),
            created_at,
            max_blob_size: DEFAULT_MAX_BLOB_SIZE as i64,
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH as i64,
            blob_threshold: 0,
            evaluators: Vec::new(),
            remote_storage: None,
            extra: Map::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_blob_size < 0 {
            return Err(ConfigError::NegativeLimit { field: "max_blob_size", value: self.max_blob_size });
        }
        if self.max_tree_depth < 0 {
            return Err(ConfigError::NegativeLimit { field: "max_tree_depth", value: self.max_tree_depth });
        }
        if self.blob_threshold < 0 {
            return Err(ConfigError::NegativeLimit { field: "blob_threshold", value: self.blob_threshold });
        }
        if self.default_lane.is_empty() {
            return Err(ConfigError::MissingField { field: "default_lane" });
        }
        Ok(())
    }

    pub fn effective_max_blob_size(&self) -> u64 {
        if self.max_blob_size > 0 { self.max_blob_size as u64 } else { DEFAULT_MAX_BLOB_SIZE }
    }

    pub fn effective_max_tree_depth(&self) -> u32 {
        if self.max_tree_depth > 0 { self.max_tree_depth as u32 } else { DEFAULT_MAX_TREE_DEPTH }
    }

    pub fn effective_blob_threshold(&self) -> u64 {
        if self.blob_threshold > 0 { self.blob_threshold as u64 } else { 0 }
    }
}

/// One external evaluator. `args` is the cross-platform form and wins when
/// both are set; `command` is split on whitespace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluatorSpec {
    pub name: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_required() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_EVALUATOR_TIMEOUT_SECS
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    NegativeLimit { field: &'static str, value: i64 },
    MissingField { field: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeLimit { field, value } => {
                write!(f, "invalid config: {field} must be >= 0, got {value} (0 means default)")
            }
            Self::MissingField { field } => write!(f, "invalid config: {field} is required"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_mean_defaults() {
        let mut config = RepoConfig::new("main", 0);
        config.max_blob_size = 0;
        config.max_tree_depth = 0;
        assert_eq!(config.effective_max_blob_size(), DEFAULT_MAX_BLOB_SIZE);
        assert_eq!(config.effective_max_tree_depth(), DEFAULT_MAX_TREE_DEPTH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn negative_limits_are_rejected() {
        let mut config = RepoConfig::new("main", 0);
        config.max_blob_size = -1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NegativeLimit { field: "max_blob_size", value: -1 })
        );
    }

    #[test]
    fn evaluator_defaults() {
        let spec: EvaluatorSpec =
            serde_json::from_str(r#"{"name":"tests","command":"cargo test"}"#).unwrap();
        assert!(spec.required);
        assert_eq!(spec.timeout_seconds, DEFAULT_EVALUATOR_TIMEOUT_SECS);
        assert!(spec.args.is_empty());
    }

    #[test]
    fn document_round_trips() {
        let config = RepoConfig::new("main", 1700000000);
        let text = serde_json::to_string_pretty(&config).unwrap();
        let back: RepoConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.default_lane, "main");
        assert_eq!(back.version, CONFIG_VERSION);
    }

    #[test]
    fn unknown_keys_survive_the_round_trip() {
        let raw = r#"{
            "version": "1.0",
            "default_lane": "main",
            "embedding_api_url": "http://localhost:9000",
            "embedding_model": "mini"
        }"#;
        let config: RepoConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(
            config.extra.get("embedding_model"),
            Some(&serde_json::json!("mini"))
        );
        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains("embedding_api_url"));
    }
}
