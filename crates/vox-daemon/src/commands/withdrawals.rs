//! Withdrawal command handlers and the transfer-provider webhook relay.

use std::sync::Arc;

use serde_json::Value;
use vox_db::queries::payouts::PayoutRow;
use vox_payments::{withdrawal, PaymentError, WithdrawalRequest, WithdrawalService};

use super::{caller_id, str_param, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

fn service(state: &DaemonState) -> std::result::Result<&WithdrawalService, RpcError> {
    state.withdrawals.as_ref().ok_or_else(|| {
        PaymentError::NotConfigured("transfer provider secret or encryption key missing").into()
    })
}

/// Client view of a payout request. The sealed account number never leaves
/// the daemon.
fn payout_json(row: &PayoutRow) -> Value {
    serde_json::json!({
        "reference": row.reference,
        "idempotency_key": row.idempotency_key,
        "user_id": row.user_id,
        "amount": row.amount,
        "amount_minor": row.amount_minor,
        "currency": row.currency,
        "account_name": row.account_name,
        "bank_code": row.bank_code,
        "account_masked": row.account_masked,
        "status": row.status,
        "transfer_code": row.transfer_code,
        "failure_reason": row.failure_reason,
        "created_at": row.created_at,
        "updated_at": row.updated_at,
    })
}

/// Lock funds and start a transfer to the caller's bank account.
pub async fn request_withdrawal(state: &Arc<DaemonState>, params: &Value) -> Result {
    let request = WithdrawalRequest {
        user_id: caller_id(params)?.to_string(),
        amount: params
            .get("amount")
            .and_then(Value::as_i64)
            .ok_or_else(|| RpcError::invalid_params("amount required"))?,
        account_number: str_param(params, "account_number")?.to_string(),
        bank_code: str_param(params, "bank_code")?.to_string(),
        account_name: str_param(params, "account_name")?.to_string(),
        idempotency_key: str_param(params, "idempotency_key")?.to_string(),
    };

    let row = service(state)?
        .request_withdrawal(&request, vox_types::now_secs())
        .await?;
    Ok(payout_json(&row))
}

/// Get one of the caller's payout requests by transfer reference.
pub async fn get_payout_request(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = caller_id(params)?;
    let reference = str_param(params, "reference")?;

    let db = state.db.lock().await;
    let row = withdrawal::find(&db, reference)?;
    if row.user_id != user_id {
        return Err(PaymentError::RequestNotFound(reference.to_string()).into());
    }
    Ok(payout_json(&row))
}

/// Re-dispatch one of the caller's requests left pending without a
/// transfer code.
pub async fn resume_withdrawal(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = caller_id(params)?;
    let reference = str_param(params, "reference")?;
    let row = service(state)?
        .resume(user_id, reference, vox_types::now_secs())
        .await?;
    Ok(payout_json(&row))
}

/// Verify and apply a transfer-provider webhook relayed by the front end.
pub async fn transfer_webhook(state: &Arc<DaemonState>, params: &Value) -> Result {
    let body = str_param(params, "body")?;
    let signature = str_param(params, "signature")?;

    let transition = service(state)?
        .handle_webhook(body.as_bytes(), signature, vox_types::now_secs())
        .await?;
    Ok(serde_json::json!({
        "handled": transition.is_some(),
        "transition": transition,
    }))
}
