//! # vox-consensus
//!
//! Vote intake and quorum settlement for voice clips.
//!
//! ## Modules
//!
//! - [`cooldown`] - Per-validator submission cooldown
//! - [`consensus`] - Tally, decision and single-transaction settlement
//! - [`submission`] - Ordered precondition checks and vote recording

pub mod consensus;
pub mod cooldown;
pub mod submission;

pub use consensus::{ConsensusConfig, ConsensusEngine, ConsensusOutcome, Settlement, Tally};
pub use cooldown::CooldownTracker;
pub use submission::{Submission, SubmissionOutcome, ValidationConfig, ValidationService};

use vox_db::DbError;
use vox_ledger::LedgerError;
use vox_types::ErrorClass;

/// Error types for consensus settlement.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("clip not found: {0}")]
    ClipNotFound(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for ConsensusError {
    fn from(e: rusqlite::Error) -> Self {
        ConsensusError::Db(DbError::Sqlite(e))
    }
}

impl ConsensusError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ConsensusError::ClipNotFound(_) => ErrorClass::NotFound,
            ConsensusError::Ledger(e) => e.class(),
            ConsensusError::Db(_) => ErrorClass::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ConsensusError::ClipNotFound(_) => "clip_not_found",
            ConsensusError::Ledger(e) => e.code(),
            ConsensusError::Db(_) => "storage_error",
        }
    }
}

/// Error types for validation submission.
///
/// Variants are listed in the order their preconditions are checked.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Submitted again before the cooldown elapsed.
    #[error("too many submissions, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("clip not found: {0}")]
    ClipNotFound(String),

    /// Owners may not validate their own clips.
    #[error("cannot validate your own clip")]
    SelfValidation,

    #[error("already voted on clip {0}")]
    AlreadyVoted(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("insufficient trust: score {score}, must exceed {minimum}")]
    InsufficientTrust { score: i64, minimum: i64 },

    #[error("clip language '{clip_language}' not among your languages")]
    LanguageMismatch { clip_language: String },

    /// The vote was recorded but the consensus check failed.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl SubmitError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SubmitError::RateLimited { .. }
            | SubmitError::SelfValidation
            | SubmitError::AlreadyVoted(_)
            | SubmitError::InsufficientTrust { .. }
            | SubmitError::LanguageMismatch { .. } => ErrorClass::Validation,
            SubmitError::ClipNotFound(_) | SubmitError::ProfileNotFound(_) => ErrorClass::NotFound,
            SubmitError::Consensus(e) => e.class(),
            SubmitError::Db(_) => ErrorClass::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SubmitError::RateLimited { .. } => "rate_limited",
            SubmitError::ClipNotFound(_) => "clip_not_found",
            SubmitError::SelfValidation => "self_validation",
            SubmitError::AlreadyVoted(_) => "already_voted",
            SubmitError::ProfileNotFound(_) => "profile_not_found",
            SubmitError::InsufficientTrust { .. } => "insufficient_trust",
            SubmitError::LanguageMismatch { .. } => "language_mismatch",
            SubmitError::Consensus(e) => e.code(),
            SubmitError::Db(_) => "storage_error",
        }
    }
}

/// Convenience result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;
