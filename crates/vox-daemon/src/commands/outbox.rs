//! Notification outbox drain commands, used by the external delivery worker.

use std::sync::Arc;

use serde_json::Value;
use vox_db::queries::outbox::{self, OutboxRow};

use super::Result;
use crate::rpc::RpcError;
use crate::DaemonState;

fn row_json(row: &OutboxRow) -> Value {
    serde_json::json!({
        "id": row.id,
        "user_id": row.user_id,
        "kind": row.kind,
        "payload": row.payload,
        "attempts": row.attempts,
        "created_at": row.created_at,
    })
}

fn id_param(params: &Value) -> std::result::Result<i64, RpcError> {
    params
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| RpcError::invalid_params("id required"))
}

/// Oldest pending notifications.
pub async fn outbox_pending(state: &Arc<DaemonState>, params: &Value) -> Result {
    let max = state.config.outbox.page_limit;
    let limit = params
        .get("limit")
        .and_then(Value::as_u64)
        .map_or(max, |l| l.min(u64::from(max)) as u32);

    let db = state.db.lock().await;
    let rows = outbox::pending(&db, limit)?;
    Ok(Value::Array(rows.iter().map(row_json).collect()))
}

/// Acknowledge delivery of a notification.
pub async fn outbox_ack(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = id_param(params)?;
    let db = state.db.lock().await;
    let acknowledged = outbox::mark_delivered(&db, id, vox_types::now_secs())?;
    Ok(serde_json::json!({ "acknowledged": acknowledged }))
}

/// Record a failed delivery attempt.
pub async fn outbox_nack(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = id_param(params)?;
    let db = state.db.lock().await;
    let recorded = outbox::mark_failed(&db, id, state.config.outbox.max_attempts)?;
    Ok(serde_json::json!({ "recorded": recorded }))
}
