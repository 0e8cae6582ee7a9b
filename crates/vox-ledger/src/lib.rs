//! # vox-ledger
//!
//! Money movement for the settlement engine.
//!
//! ## Modules
//!
//! - [`ledger`] - Atomic balance updates paired with append-only log entries
//! - [`rates`] - In-memory reward rate cache with TTL refresh
//! - [`payout`] - Reward computation (role multipliers) and referral kickbacks
//! - [`royalty`] - Remix royalty split and remix chain depth

pub mod ledger;
pub mod payout;
pub mod rates;
pub mod royalty;

pub use payout::{Award, PayoutConfig, PayoutEngine};
pub use rates::RateCache;
pub use royalty::RoyaltySplit;

use vox_db::DbError;
use vox_types::ErrorClass;

/// Error types for ledger and payout operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Storage failure. The enclosing unit of work must roll back.
    #[error(transparent)]
    Db(#[from] DbError),

    /// The profile to credit or debit does not exist.
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    /// Available balance is lower than the requested debit or lock.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount requested, in micros.
        required: i64,
        /// Available balance, in micros.
        available: i64,
    },

    /// Pending balance is lower than the amount to release.
    #[error("insufficient locked balance: required {required}, locked {locked}")]
    InsufficientLocked {
        /// Amount to release, in micros.
        required: i64,
        /// Pending balance, in micros.
        locked: i64,
    },

    /// Amounts passed to the ledger must be positive.
    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    /// No active rate exists for an in-use action type.
    #[error("no active reward rate for '{0}'")]
    MissingRate(String),

    /// Invalid split configuration.
    #[error("invalid split: {0}")]
    InvalidSplit(String),

    /// Arithmetic overflow.
    #[error("arithmetic overflow in payout calculation")]
    Overflow,
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Db(DbError::Sqlite(e))
    }
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::InsufficientBalance { .. } | LedgerError::InvalidAmount(_) => {
                ErrorClass::Validation
            }
            LedgerError::ProfileNotFound(_) => ErrorClass::NotFound,
            LedgerError::MissingRate(_) | LedgerError::InvalidSplit(_) => {
                ErrorClass::Configuration
            }
            LedgerError::Db(_) | LedgerError::InsufficientLocked { .. } | LedgerError::Overflow => {
                ErrorClass::Internal
            }
        }
    }

    /// Machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Db(_) => "storage_error",
            LedgerError::ProfileNotFound(_) => "profile_not_found",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::InsufficientLocked { .. } => "insufficient_locked_balance",
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::MissingRate(_) => "missing_reward_rate",
            LedgerError::InvalidSplit(_) => "invalid_split",
            LedgerError::Overflow => "overflow",
        }
    }
}

/// Convenience result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
