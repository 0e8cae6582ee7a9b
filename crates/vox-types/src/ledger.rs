//! Ledger vocabulary: transaction kinds and reward actions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseTagError;

/// Type tag of an append-only ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Earning,
    Bonus,
    Penalty,
    Refund,
    Withdrawal,
    TopUp,
    FundLock,
    FundUnlock,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earning => "earning",
            Self::Bonus => "bonus",
            Self::Penalty => "penalty",
            Self::Refund => "refund",
            Self::Withdrawal => "withdrawal",
            Self::TopUp => "top_up",
            Self::FundLock => "fund_lock",
            Self::FundUnlock => "fund_unlock",
        }
    }

    /// Kinds that count towards a profile's lifetime earnings.
    pub fn counts_as_earning(&self) -> bool {
        matches!(self, Self::Earning | Self::Bonus)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earning" => Ok(Self::Earning),
            "bonus" => Ok(Self::Bonus),
            "penalty" => Ok(Self::Penalty),
            "refund" => Ok(Self::Refund),
            "withdrawal" => Ok(Self::Withdrawal),
            "top_up" => Ok(Self::TopUp),
            "fund_lock" => Ok(Self::FundLock),
            "fund_unlock" => Ok(Self::FundUnlock),
            other => Err(ParseTagError::new("transaction kind", other)),
        }
    }
}

/// Rewardable action. Keys the persisted rate table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardAction {
    /// Paid to the owner of an approved clip.
    ClipApproved,
    /// Paid to each validator who agreed with consensus.
    CorrectValidation,
}

impl RewardAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClipApproved => "clip_approved",
            Self::CorrectValidation => "correct_validation",
        }
    }
}

impl fmt::Display for RewardAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_parse_back() {
        for kind in [
            TransactionKind::Earning,
            TransactionKind::Bonus,
            TransactionKind::Penalty,
            TransactionKind::Refund,
            TransactionKind::Withdrawal,
            TransactionKind::TopUp,
            TransactionKind::FundLock,
            TransactionKind::FundUnlock,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_counts_as_earning() {
        assert!(TransactionKind::Earning.counts_as_earning());
        assert!(TransactionKind::Bonus.counts_as_earning());
        assert!(!TransactionKind::Refund.counts_as_earning());
        assert!(!TransactionKind::FundLock.counts_as_earning());
    }
}
