//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category.

pub mod ledger;
pub mod outbox;
pub mod validation;
pub mod withdrawals;

use serde_json::Value;

use crate::rpc::RpcError;

type Result = std::result::Result<Value, RpcError>;

/// The acting user, as asserted by the authenticated front end.
fn caller_id(params: &Value) -> std::result::Result<&str, RpcError> {
    str_param(params, "caller_id")
}

fn str_param<'a>(params: &'a Value, key: &str) -> std::result::Result<&'a str, RpcError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&e.to_string()))
}
