//! Validation submission and consensus command handlers.

use std::sync::Arc;

use serde_json::Value;
use vox_consensus::Submission;

use super::{caller_id, str_param, to_value, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Record the caller's vote on a clip.
pub async fn submit_validation(state: &Arc<DaemonState>, params: &Value) -> Result {
    let submission = Submission {
        validator_id: caller_id(params)?.to_string(),
        clip_id: str_param(params, "clip_id")?.to_string(),
        is_valid: params
            .get("is_valid")
            .and_then(Value::as_bool)
            .ok_or_else(|| RpcError::invalid_params("is_valid required"))?,
        feedback: params
            .get("feedback")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    let mut db = state.db.lock().await;
    let outcome = state
        .validation
        .submit(&mut db, &submission, vox_types::now_secs())?;
    to_value(&outcome)
}

/// Re-run the consensus check for a clip, e.g. after a failed settlement.
pub async fn check_consensus(state: &Arc<DaemonState>, params: &Value) -> Result {
    let clip_id = str_param(params, "clip_id")?;
    let mut db = state.db.lock().await;
    let outcome = state
        .validation
        .consensus()
        .check(&mut db, clip_id, vox_types::now_secs())?;
    to_value(&outcome)
}
