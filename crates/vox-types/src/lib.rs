//! # vox-types
//!
//! Shared domain types used across the vox workspace: identifiers, money
//! units, clip/vote/profile vocabulary, ledger transaction kinds, payout
//! request states, notification outbox kinds and the error taxonomy.

pub mod clip;
pub mod error;
pub mod ledger;
pub mod outbox;
pub mod payout;
pub mod profile;

pub use clip::ClipStatus;
pub use error::ErrorClass;
pub use ledger::{RewardAction, TransactionKind};
pub use outbox::{OutboxKind, OutboxStatus};
pub use payout::PayoutStatus;
pub use profile::Role;

/// Common type aliases.
pub type UserId = String;
pub type ClipId = String;
pub type VoteId = i64;
pub type Timestamp = u64;

/// Micros per unit of account (1 USD = 1,000,000 micros).
pub const MICROS_PER_USD: i64 = 1_000_000;

/// Denominator for basis-point percentages and multipliers.
pub const BPS_DENOMINATOR: i64 = 10_000;

/// Seconds in one calendar day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Default trust score for a new profile.
pub const DEFAULT_TRUST_SCORE: i64 = 100;

/// Lowest possible trust score.
pub const TRUST_FLOOR: i64 = 0;

/// Highest possible trust score.
pub const TRUST_CEILING: i64 = 200;

/// Start of the UTC calendar day containing `ts`.
pub fn day_start(ts: Timestamp) -> Timestamp {
    ts - ts % SECONDS_PER_DAY
}

/// UTC calendar day number of `ts`.
pub fn day_number(ts: Timestamp) -> u64 {
    ts / SECONDS_PER_DAY
}

/// Current wall-clock time as Unix seconds.
pub fn now_secs() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returned when a stored tag does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseTagError {
    /// Which vocabulary was being parsed.
    pub kind: &'static str,
    /// The offending value.
    pub value: String,
}

impl ParseTagError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
