//! Payout engine.
//!
//! Computes what an action is worth for a given payee and credits it. The
//! base amount comes from the [`RateCache`]; validators and ambassadors get a
//! basis-point multiplier on top. A payee with a referrer triggers a
//! referral kickback, credited inside a savepoint so that a failing kickback
//! never undoes the primary award.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use vox_db::queries::profiles;
use vox_db::UnitOfWork;
use vox_types::{RewardAction, Role, Timestamp, TransactionKind, BPS_DENOMINATOR};

use crate::ledger;
use crate::rates::RateCache;
use crate::{LedgerError, Result};

/// Default referral kickback: 5% of each award.
pub const DEFAULT_REFERRAL_BPS: u32 = 500;

/// Default validator multiplier: 1.4x.
pub const DEFAULT_VALIDATOR_MULTIPLIER_BPS: u32 = 14_000;

/// Default ambassador multiplier: 1.5x.
pub const DEFAULT_AMBASSADOR_MULTIPLIER_BPS: u32 = 15_000;

/// Payout tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutConfig {
    /// Referrer's share of each award, in basis points.
    pub referral_bps: u32,
    /// Multiplier for `validator` profiles, in basis points.
    pub validator_multiplier_bps: u32,
    /// Multiplier for `ambassador` profiles, in basis points.
    pub ambassador_multiplier_bps: u32,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            referral_bps: DEFAULT_REFERRAL_BPS,
            validator_multiplier_bps: DEFAULT_VALIDATOR_MULTIPLIER_BPS,
            ambassador_multiplier_bps: DEFAULT_AMBASSADOR_MULTIPLIER_BPS,
        }
    }
}

impl PayoutConfig {
    pub fn multiplier_bps(&self, role: Role) -> u32 {
        match role {
            Role::User => BPS_DENOMINATOR as u32,
            Role::Validator => self.validator_multiplier_bps,
            Role::Ambassador => self.ambassador_multiplier_bps,
        }
    }
}

/// `amount * bps / 10_000`, rounded down.
pub fn apply_bps(amount: i64, bps: u32) -> Result<i64> {
    let scaled = i128::from(amount)
        .checked_mul(i128::from(bps))
        .ok_or(LedgerError::Overflow)?
        / i128::from(BPS_DENOMINATOR);
    i64::try_from(scaled).map_err(|_| LedgerError::Overflow)
}

/// Referral bonus paid alongside an award.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Kickback {
    pub referrer_id: String,
    pub amount: i64,
}

/// Result of [`PayoutEngine::award`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Award {
    pub payee_id: String,
    pub action: RewardAction,
    /// Credited amount in micros. Zero when the active rate is zero.
    pub amount: i64,
    /// Ledger entry id of the credit, if one was written.
    pub entry_id: Option<i64>,
    pub kickback: Option<Kickback>,
}

/// Reward computation and crediting.
#[derive(Debug)]
pub struct PayoutEngine {
    rates: Arc<RateCache>,
    config: PayoutConfig,
}

impl PayoutEngine {
    pub fn new(rates: Arc<RateCache>, config: PayoutConfig) -> Self {
        Self { rates, config }
    }

    pub fn rates(&self) -> &Arc<RateCache> {
        &self.rates
    }

    pub fn config(&self) -> &PayoutConfig {
        &self.config
    }

    /// Amount `action` is worth to a payee with `role`.
    pub fn reward_for(&self, conn: &Connection, action: RewardAction, role: Role) -> Result<i64> {
        let base = self.rates.amount(conn, action)?;
        apply_bps(base, self.config.multiplier_bps(role))
    }

    /// Credit `payee` for `action` and pay any referral kickback.
    pub fn award(
        &self,
        uow: &UnitOfWork<'_>,
        payee_id: &str,
        action: RewardAction,
        description: &str,
        reference: Option<&str>,
        now: Timestamp,
    ) -> Result<Award> {
        let payee = profiles::find(uow, payee_id)?
            .ok_or_else(|| LedgerError::ProfileNotFound(payee_id.to_string()))?;
        let amount = self.reward_for(uow, action, payee.role)?;

        if amount == 0 {
            tracing::debug!(payee = payee_id, action = %action, "zero rate, nothing credited");
            return Ok(Award {
                payee_id: payee_id.to_string(),
                action,
                amount,
                entry_id: None,
                kickback: None,
            });
        }

        let entry_id = ledger::credit(
            uow,
            payee_id,
            amount,
            TransactionKind::Earning,
            description,
            reference,
            now,
        )?;
        tracing::info!(payee = payee_id, action = %action, amount, "reward credited");

        let kickback = match payee.referred_by.as_deref() {
            Some(referrer) if referrer != payee_id => {
                self.pay_kickback(uow, payee_id, referrer, amount, reference, now)
            }
            _ => None,
        };

        Ok(Award {
            payee_id: payee_id.to_string(),
            action,
            amount,
            entry_id: Some(entry_id),
            kickback,
        })
    }

    fn pay_kickback(
        &self,
        uow: &UnitOfWork<'_>,
        payee_id: &str,
        referrer_id: &str,
        earned: i64,
        reference: Option<&str>,
        now: Timestamp,
    ) -> Option<Kickback> {
        let result = uow.savepoint("referral_kickback", |sp| -> Result<Option<Kickback>> {
            let amount = apply_bps(earned, self.config.referral_bps)?;
            if amount <= 0 {
                return Ok(None);
            }
            ledger::credit(
                sp,
                referrer_id,
                amount,
                TransactionKind::Bonus,
                &format!("Referral bonus from {payee_id}"),
                reference,
                now,
            )?;
            profiles::add_referral_earnings(sp, referrer_id, amount)?;
            Ok(Some(Kickback {
                referrer_id: referrer_id.to_string(),
                amount,
            }))
        });

        match result {
            Ok(kickback) => kickback,
            Err(e) => {
                tracing::warn!(
                    payee = payee_id,
                    referrer = referrer_id,
                    error = %e,
                    "referral kickback skipped"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_db::queries::profiles::NewProfile;
    use vox_db::transact;

    fn engine() -> PayoutEngine {
        PayoutEngine::new(Arc::new(RateCache::default()), PayoutConfig::default())
    }

    #[test]
    fn test_apply_bps() {
        assert_eq!(apply_bps(100_000, 10_000).expect("bps"), 100_000);
        assert_eq!(apply_bps(20_000, 14_000).expect("bps"), 28_000);
        assert_eq!(apply_bps(100_000, 500).expect("bps"), 5_000);
        assert_eq!(apply_bps(3, 3_333).expect("bps"), 0);
        assert!(matches!(apply_bps(i64::MAX, 20_000), Err(LedgerError::Overflow)));
    }

    #[test]
    fn test_role_multipliers() {
        let conn = vox_db::open_memory().expect("open");
        let engine = engine();
        let action = RewardAction::CorrectValidation;
        assert_eq!(engine.reward_for(&conn, action, Role::User).expect("r"), 20_000);
        assert_eq!(engine.reward_for(&conn, action, Role::Validator).expect("r"), 28_000);
        assert_eq!(engine.reward_for(&conn, action, Role::Ambassador).expect("r"), 30_000);
    }

    #[test]
    fn test_award_with_referral() {
        let mut conn = vox_db::open_memory().expect("open");
        profiles::insert(&conn, &NewProfile::new("ref"), 0).expect("insert");
        profiles::insert(&conn, &NewProfile::new("u").referred_by("ref"), 0).expect("insert");

        let award = transact(&mut conn, |uow| {
            engine().award(uow, "u", RewardAction::ClipApproved, "Clip approved", Some("c1"), 1)
        })
        .expect("award");

        assert_eq!(award.amount, 100_000);
        assert_eq!(
            award.kickback,
            Some(Kickback {
                referrer_id: "ref".into(),
                amount: 5_000
            })
        );

        let referrer = profiles::get(&conn, "ref").expect("get");
        assert_eq!(referrer.balance, 5_000);
        assert_eq!(referrer.referral_earnings, 5_000);
        assert_eq!(referrer.lifetime_earned, 5_000);
        assert!(ledger::reconciles(&conn, "ref").expect("reconcile"));
    }

    #[test]
    fn test_failed_kickback_keeps_award() {
        let mut conn = vox_db::open_memory().expect("open");
        profiles::insert(&conn, &NewProfile::new("u").referred_by("deleted"), 0)
            .expect("insert");

        let award = transact(&mut conn, |uow| {
            engine().award(uow, "u", RewardAction::ClipApproved, "Clip approved", None, 1)
        })
        .expect("award");

        assert_eq!(award.kickback, None);
        assert_eq!(profiles::get(&conn, "u").expect("get").balance, 100_000);
        assert_eq!(ledger::history(&conn, "u", 10).expect("history").len(), 1);
    }

    #[test]
    fn test_zero_rate_credits_nothing() {
        let mut conn = vox_db::open_memory().expect("open");
        profiles::insert(&conn, &NewProfile::new("u"), 0).expect("insert");
        let engine = engine();
        engine
            .rates()
            .set_rate(&conn, RewardAction::ClipApproved, 0, 1)
            .expect("set");

        let award = transact(&mut conn, |uow| {
            engine.award(uow, "u", RewardAction::ClipApproved, "Clip approved", None, 2)
        })
        .expect("award");
        assert_eq!(award.amount, 0);
        assert_eq!(award.entry_id, None);
        assert!(ledger::history(&conn, "u", 10).expect("history").is_empty());
    }

    #[test]
    fn test_award_unknown_payee() {
        let mut conn = vox_db::open_memory().expect("open");
        let err = transact(&mut conn, |uow| {
            engine().award(uow, "ghost", RewardAction::ClipApproved, "x", None, 1)
        })
        .expect_err("missing");
        assert!(matches!(err, LedgerError::ProfileNotFound(_)));
    }
}
