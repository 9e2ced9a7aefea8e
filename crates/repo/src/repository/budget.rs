#![forbid(unsafe_code)]
//! Per-lane cost budgets. Stored in the lane's metadata document under
//! the `budget` key, so no schema is involved.

use crate::error::RepoError;
use fl_core::model::CostRecord;
use fl_storage::SqliteStore;
use serde::{Deserialize, Serialize};

fn default_alert_threshold() -> f64 {
    80.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_out: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_api_calls: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wall_time_ms: Option<i64>,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold_pct: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens_in: None,
            max_tokens_out: None,
            max_api_calls: None,
            max_wall_time_ms: None,
            alert_threshold_pct: default_alert_threshold(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BudgetStatus {
    pub config: BudgetConfig,
    pub totals: CostRecord,
    pub warnings: Vec<String>,
    pub exceeded: Vec<String>,
}

pub(crate) fn lane_budget(
    store: &SqliteStore,
    lane: &str,
) -> Result<Option<BudgetConfig>, RepoError> {
    let info = store.get_lane(lane)?;
    let Some(raw) = info.metadata.get("budget") else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_value(raw.clone())?))
}

pub(crate) fn set_lane_budget(
    store: &mut SqliteStore,
    lane: &str,
    config: &BudgetConfig,
) -> Result<(), RepoError> {
    let value = serde_json::to_value(config)?;
    store.update_lane_metadata(lane, |meta| {
        meta.insert("budget".to_string(), value);
    })?;
    Ok(())
}

/// Recompute warning/exceeded sets for the given totals.
fn evaluate_limits(config: &BudgetConfig, totals: &CostRecord) -> (Vec<String>, Vec<String>) {
    let threshold = config.alert_threshold_pct / 100.0;
    let mut warnings = Vec::new();
    let mut exceeded = Vec::new();
    let mut check = |name: &str, current: i64, limit: Option<i64>| {
        let Some(limit) = limit else { return };
        if current >= limit {
            exceeded.push(name.to_string());
        } else if (current as f64) >= (limit as f64) * threshold {
            warnings.push(name.to_string());
        }
    };
    check("tokens_in", totals.tokens_in, config.max_tokens_in);
    check("tokens_out", totals.tokens_out, config.max_tokens_out);
    check("api_calls", totals.api_calls, config.max_api_calls);
    check("wall_time_ms", totals.wall_time_ms, config.max_wall_time_ms);
    (warnings, exceeded)
}

/// Current budget standing for a lane, or None when no budget is set.
pub(crate) fn budget_status(
    store: &SqliteStore,
    lane: &str,
) -> Result<Option<BudgetStatus>, RepoError> {
    let Some(config) = lane_budget(store, lane)? else {
        return Ok(None);
    };
    let totals = store.lane_cost_totals(lane)?;
    let (warnings, exceeded) = evaluate_limits(&config, &totals);
    Ok(Some(BudgetStatus { config, totals, warnings, exceeded }))
}

/// Gate for propose/checkpoint: with `additional` folded in, any
/// exceeded limit fails `BudgetExceeded` before a transition exists;
/// threshold crossings come back as warnings.
pub(crate) fn check_budget(
    store: &SqliteStore,
    lane: &str,
    additional: Option<&CostRecord>,
) -> Result<Vec<String>, RepoError> {
    let Some(config) = lane_budget(store, lane)? else {
        return Ok(Vec::new());
    };
    let mut totals = store.lane_cost_totals(lane)?;
    if let Some(additional) = additional {
        totals.add(additional);
    }
    let (warnings, exceeded) = evaluate_limits(&config, &totals);
    if !exceeded.is_empty() {
        return Err(RepoError::BudgetExceeded { lane: lane.to_string(), exceeded });
    }
    Ok(warnings)
}
