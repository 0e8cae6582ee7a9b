//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! newline-delimited JSON-RPC 2.0 calls to the command handlers. The front
//! end authenticates users itself and passes the acting user as
//! `params.caller_id`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};
use vox_consensus::{ConsensusError, SubmitError};
use vox_db::DbError;
use vox_ledger::LedgerError;
use vox_payments::PaymentError;
use vox_types::ErrorClass;

use crate::commands;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Rejected input or failed precondition.
pub const VALIDATION_ERROR: i32 = -32020;
/// Referenced clip, profile or request does not exist.
pub const NOT_FOUND_ERROR: i32 = -32030;
/// Missing reward rate, provider credentials or encryption key.
pub const CONFIGURATION_ERROR: i32 = -32050;
/// Transfer provider failure or timeout.
pub const PROVIDER_ERROR: i32 = -32060;

impl RpcError {
    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Engine error carrying its class and machine-readable reason.
    pub fn domain(class: ErrorClass, reason: &str, detail: String) -> Self {
        let code = match class {
            ErrorClass::Validation => VALIDATION_ERROR,
            ErrorClass::NotFound => NOT_FOUND_ERROR,
            ErrorClass::Configuration => CONFIGURATION_ERROR,
            ErrorClass::Provider => PROVIDER_ERROR,
            ErrorClass::Internal => -32603,
        };
        Self {
            code,
            message: reason.to_ascii_uppercase(),
            data: Some(serde_json::json!({
                "class": class.as_str(),
                "reason": reason,
                "detail": detail,
            })),
        }
    }

    fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        if let Some(serde_json::Value::Object(map)) = self.data.as_mut() {
            map.insert(key.to_string(), value);
        }
        self
    }
}

impl From<SubmitError> for RpcError {
    fn from(e: SubmitError) -> Self {
        let err = RpcError::domain(e.class(), e.code(), e.to_string());
        match e {
            SubmitError::RateLimited { retry_after_secs } => {
                err.with_data("retry_after_secs", retry_after_secs.into())
            }
            _ => err,
        }
    }
}

impl From<ConsensusError> for RpcError {
    fn from(e: ConsensusError) -> Self {
        RpcError::domain(e.class(), e.code(), e.to_string())
    }
}

impl From<LedgerError> for RpcError {
    fn from(e: LedgerError) -> Self {
        RpcError::domain(e.class(), e.code(), e.to_string())
    }
}

impl From<PaymentError> for RpcError {
    fn from(e: PaymentError) -> Self {
        RpcError::domain(e.class(), e.code(), e.to_string())
    }
}

impl From<DbError> for RpcError {
    fn from(e: DbError) -> Self {
        RpcError::internal_error(&format!("db error: {e}"))
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => dispatch_request(&state, request).await,
            Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(state: &Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }

    let method = request.method.as_str();
    let params = &request.params;
    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Validation
        "submit_validation" => commands::validation::submit_validation(state, params).await,
        "check_consensus" => commands::validation::check_consensus(state, params).await,

        // Ledger
        "get_balance" => commands::ledger::get_balance(state, params).await,
        "get_transactions" => commands::ledger::get_transactions(state, params).await,
        "refresh_rates" => commands::ledger::refresh_rates(state).await,

        // Withdrawals
        "request_withdrawal" => commands::withdrawals::request_withdrawal(state, params).await,
        "get_payout_request" => commands::withdrawals::get_payout_request(state, params).await,
        "resume_withdrawal" => commands::withdrawals::resume_withdrawal(state, params).await,
        "transfer_webhook" => commands::withdrawals::transfer_webhook(state, params).await,

        // Notification outbox
        "outbox_pending" => commands::outbox::outbox_pending(state, params).await,
        "outbox_ack" => commands::outbox::outbox_ack(state, params).await,
        "outbox_nack" => commands::outbox::outbox_nack(state, params).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}
