//! Balance, history and rate-table command handlers.

use std::sync::Arc;

use serde_json::Value;
use vox_ledger::ledger;

use super::{caller_id, to_value, Result};
use crate::DaemonState;

/// Default page size for `get_transactions`.
const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Largest page size for `get_transactions`.
const MAX_HISTORY_LIMIT: u32 = 500;

/// Get the caller's available, pending and lifetime balances.
pub async fn get_balance(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = caller_id(params)?;
    let db = state.db.lock().await;
    let balances = ledger::balances(&db, user_id)?;
    to_value(&balances)
}

/// Get the caller's ledger entries, newest first.
pub async fn get_transactions(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = caller_id(params)?;
    let limit = params
        .get("limit")
        .and_then(Value::as_u64)
        .map_or(DEFAULT_HISTORY_LIMIT, |l| l.min(u64::from(MAX_HISTORY_LIMIT)) as u32);

    let db = state.db.lock().await;
    let entries = ledger::history(&db, user_id, limit)?;
    to_value(&entries)
}

/// Reload the reward rate table now instead of waiting for the TTL.
pub async fn refresh_rates(state: &Arc<DaemonState>) -> Result {
    let db = state.db.lock().await;
    let count = state.rates.refresh(&db)?;
    Ok(serde_json::json!({ "active_rates": count }))
}
