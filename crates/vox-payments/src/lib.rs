//! # vox-payments
//!
//! Cash-out of ledger balances through an external transfer provider.
//!
//! ## Modules
//!
//! - [`withdrawal`] - Fund locking, idempotency and terminal transitions
//! - [`service`] - Async orchestration of lock, provider call and refund-on-failure
//! - [`provider`] - Transfer provider interface
//! - [`http`] - HTTP transfer provider client
//! - [`webhook`] - Provider callback parsing and signature verification
//! - [`exchange`] - Ledger micros to provider minor units

pub mod exchange;
pub mod http;
pub mod provider;
pub mod service;
pub mod webhook;
pub mod withdrawal;

pub use exchange::{ExchangeRateProvider, FixedRateExchange};
pub use http::HttpTransferProvider;
pub use provider::{ProviderError, TransferProvider};
pub use service::WithdrawalService;
pub use webhook::{TransferEvent, TransferEventKind};
pub use withdrawal::{WithdrawalConfig, WithdrawalRequest};

use vox_crypto::CryptoError;
use vox_db::DbError;
use vox_ledger::LedgerError;
use vox_types::ErrorClass;

/// Error types for withdrawal operations.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// Requested amount below the configured minimum.
    #[error("amount {amount} is below the minimum withdrawal of {minimum}")]
    BelowMinimum { amount: i64, minimum: i64 },

    /// Trailing 24 h total would exceed the daily cap.
    #[error("daily withdrawal limit exceeded: {used} used, {requested} requested, cap {cap}")]
    DailyLimitExceeded {
        requested: i64,
        used: i64,
        cap: i64,
    },

    /// The idempotency key belongs to another user's request.
    #[error("idempotency key already used")]
    IdempotencyKeyReused,

    #[error("invalid withdrawal request: {0}")]
    InvalidRequest(String),

    #[error("payout request not found: {0}")]
    RequestNotFound(String),

    #[error("webhook signature rejected")]
    InvalidSignature,

    #[error("malformed webhook event: {0}")]
    MalformedEvent(String),

    /// Missing provider credentials or encryption key.
    #[error("withdrawals not configured: {0}")]
    NotConfigured(&'static str),

    #[error("transfer provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("transfer provider timed out after {0}s")]
    ProviderTimeout(u64),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for PaymentError {
    fn from(e: rusqlite::Error) -> Self {
        PaymentError::Db(DbError::Sqlite(e))
    }
}

impl PaymentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PaymentError::BelowMinimum { .. }
            | PaymentError::DailyLimitExceeded { .. }
            | PaymentError::IdempotencyKeyReused
            | PaymentError::InvalidRequest(_)
            | PaymentError::InvalidSignature
            | PaymentError::MalformedEvent(_) => ErrorClass::Validation,
            PaymentError::RequestNotFound(_) => ErrorClass::NotFound,
            PaymentError::NotConfigured(_) => ErrorClass::Configuration,
            PaymentError::Provider(_) | PaymentError::ProviderTimeout(_) => ErrorClass::Provider,
            PaymentError::Ledger(e) => e.class(),
            PaymentError::Crypto(_) | PaymentError::Db(_) => ErrorClass::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::BelowMinimum { .. } => "below_minimum_withdrawal",
            PaymentError::DailyLimitExceeded { .. } => "daily_limit_exceeded",
            PaymentError::IdempotencyKeyReused => "idempotency_key_reused",
            PaymentError::InvalidRequest(_) => "invalid_request",
            PaymentError::RequestNotFound(_) => "payout_request_not_found",
            PaymentError::InvalidSignature => "invalid_signature",
            PaymentError::MalformedEvent(_) => "malformed_event",
            PaymentError::NotConfigured(_) => "withdrawals_not_configured",
            PaymentError::Provider(_) => "provider_error",
            PaymentError::ProviderTimeout(_) => "provider_timeout",
            PaymentError::Ledger(e) => e.code(),
            PaymentError::Crypto(_) => "crypto_error",
            PaymentError::Db(_) => "storage_error",
        }
    }
}

/// Convenience result type for payment operations.
pub type Result<T> = std::result::Result<T, PaymentError>;
