//! Notification outbox vocabulary.
//!
//! Rows are written inside the owning unit of work and drained by an
//! external delivery worker after commit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseTagError;

/// What an outbox row describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxKind {
    // Consensus events
    ClipApproved,
    ClipRejected,
    ValidationSettled,

    // Progression events (badge awarding)
    ValidatorProgress,

    // Withdrawal events
    WithdrawalCompleted,
    WithdrawalFailed,
}

impl OutboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClipApproved => "clip_approved",
            Self::ClipRejected => "clip_rejected",
            Self::ValidationSettled => "validation_settled",
            Self::ValidatorProgress => "validator_progress",
            Self::WithdrawalCompleted => "withdrawal_completed",
            Self::WithdrawalFailed => "withdrawal_failed",
        }
    }
}

impl fmt::Display for OutboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxKind {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clip_approved" => Ok(Self::ClipApproved),
            "clip_rejected" => Ok(Self::ClipRejected),
            "validation_settled" => Ok(Self::ValidationSettled),
            "validator_progress" => Ok(Self::ValidatorProgress),
            "withdrawal_completed" => Ok(Self::WithdrawalCompleted),
            "withdrawal_failed" => Ok(Self::WithdrawalFailed),
            other => Err(ParseTagError::new("outbox kind", other)),
        }
    }
}

/// Delivery state of an outbox row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(ParseTagError::new("outbox status", other)),
        }
    }
}
