//! Consensus engine.
//!
//! A clip collects votes until at least `threshold` have been cast and one
//! side holds a majority of `⌈threshold / 2⌉ + 1`. The first check that sees
//! a majority settles the clip in a single unit of work:
//!
//! 1. Re-read the clip; stop if another check already settled it
//! 2. Move the clip to the decided status (guarded by `status = 'pending'`)
//! 3. Reward agreeing validators and raise their trust
//! 4. Lower disagreeing validators' trust (no monetary penalty)
//! 5. Pay the owner, splitting with the parent owner for remixes
//! 6. Write outbox rows for the owner and every validator
//!
//! Any failure rolls the whole settlement back.
//!
//! A clip whose votes exceed the threshold without a majority stays pending
//! until more votes arrive. Nothing escalates it automatically.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use vox_db::queries::clips::{self, ClipRow};
use vox_db::queries::{outbox, profiles, votes};
use vox_db::{transact, UnitOfWork};
use vox_ledger::royalty::{self, RoyaltyPayout};
use vox_ledger::{PayoutEngine, RoyaltySplit};
use vox_types::{
    ClipStatus, OutboxKind, RewardAction, Timestamp, TRUST_CEILING, TRUST_FLOOR,
};

use crate::{ConsensusError, Result};

/// Consensus and trust tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Minimum number of votes before a decision is evaluated.
    pub threshold: u32,
    /// Trust gained for agreeing with consensus.
    pub trust_reward: i64,
    /// Trust lost for disagreeing with consensus.
    pub trust_penalty: i64,
    pub trust_floor: i64,
    pub trust_ceiling: i64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            trust_reward: 2,
            trust_penalty: 5,
            trust_floor: TRUST_FLOOR,
            trust_ceiling: TRUST_CEILING,
        }
    }
}

impl ConsensusConfig {
    /// Votes one side needs to settle: `⌈threshold / 2⌉ + 1`.
    pub fn majority(&self) -> u32 {
        self.threshold.div_ceil(2) + 1
    }

    /// Decision for a tally, or `None` while still collecting.
    pub fn decide(&self, tally: Tally) -> Option<ClipStatus> {
        if tally.total() < self.threshold {
            return None;
        }
        let majority = self.majority();
        if tally.approvals >= majority {
            Some(ClipStatus::Approved)
        } else if tally.rejections >= majority {
            Some(ClipStatus::Rejected)
        } else {
            None
        }
    }
}

/// Vote counts for one clip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub approvals: u32,
    pub rejections: u32,
}

impl Tally {
    pub fn of(votes: &[votes::VoteRow]) -> Self {
        votes.iter().fold(Self::default(), |mut tally, vote| {
            if vote.is_valid {
                tally.approvals += 1;
            } else {
                tally.rejections += 1;
            }
            tally
        })
    }

    pub fn total(&self) -> u32 {
        self.approvals + self.rejections
    }
}

/// Effect of a settlement on one validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidatorEffect {
    pub validator_id: String,
    pub agreed: bool,
    /// Micros credited; zero for disagreeing validators.
    pub reward: i64,
    pub trust_score: i64,
}

/// What a settlement did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub clip_id: String,
    pub decision: ClipStatus,
    pub tally: Tally,
    pub validators: Vec<ValidatorEffect>,
    /// Micros credited to the clip owner (the remixer's share for remixes).
    pub owner_reward: i64,
    pub royalty: Option<RoyaltyPayout>,
    pub remix_depth: u32,
}

/// Result of a consensus check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConsensusOutcome {
    /// Still collecting votes.
    Pending { approvals: u32, rejections: u32 },
    /// This check settled the clip.
    Settled(Settlement),
    /// The clip was already settled; nothing changed.
    AlreadySettled { status: ClipStatus },
}

impl ConsensusOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }
}

/// Detects quorum and applies settlement.
#[derive(Debug)]
pub struct ConsensusEngine {
    config: ConsensusConfig,
    payouts: Arc<PayoutEngine>,
    royalty: RoyaltySplit,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig, payouts: Arc<PayoutEngine>, royalty: RoyaltySplit) -> Self {
        Self {
            config,
            payouts,
            royalty,
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Check `clip_id` for consensus and settle it if reached.
    ///
    /// Safe to call any number of times, concurrently from several
    /// connections: at most one call returns [`ConsensusOutcome::Settled`].
    pub fn check(
        &self,
        conn: &mut Connection,
        clip_id: &str,
        now: Timestamp,
    ) -> Result<ConsensusOutcome> {
        let clip = clips::find(conn, clip_id)?
            .ok_or_else(|| ConsensusError::ClipNotFound(clip_id.to_string()))?;
        if clip.status.is_terminal() {
            return Ok(ConsensusOutcome::AlreadySettled {
                status: clip.status,
            });
        }

        let tally = Tally::of(&votes::for_clip(conn, clip_id)?);
        if self.config.decide(tally).is_none() {
            if tally.total() > self.config.threshold {
                tracing::debug!(
                    clip_id,
                    approvals = tally.approvals,
                    rejections = tally.rejections,
                    "clip stalled without majority"
                );
            }
            return Ok(ConsensusOutcome::Pending {
                approvals: tally.approvals,
                rejections: tally.rejections,
            });
        }

        transact(conn, |uow| self.settle(uow, clip_id, now))
    }

    fn settle(&self, uow: &UnitOfWork<'_>, clip_id: &str, now: Timestamp) -> Result<ConsensusOutcome> {
        let clip = clips::find(uow, clip_id)?
            .ok_or_else(|| ConsensusError::ClipNotFound(clip_id.to_string()))?;
        if clip.status.is_terminal() {
            tracing::debug!(clip_id, status = %clip.status, "clip already settled");
            return Ok(ConsensusOutcome::AlreadySettled {
                status: clip.status,
            });
        }

        let votes = votes::for_clip(uow, clip_id)?;
        let tally = Tally::of(&votes);
        let Some(decision) = self.config.decide(tally) else {
            return Ok(ConsensusOutcome::Pending {
                approvals: tally.approvals,
                rejections: tally.rejections,
            });
        };

        if !clips::settle(uow, clip_id, decision, now)? {
            let status = clips::find(uow, clip_id)?.map_or(decision, |c| c.status);
            return Ok(ConsensusOutcome::AlreadySettled { status });
        }

        let mut validators = Vec::with_capacity(votes.len());
        for vote in &votes {
            let agreed = decision.agreeing_decision() == Some(vote.is_valid);
            let effect = self.apply_validator(uow, &clip, &vote.validator_id, agreed, now)?;
            outbox::enqueue(
                uow,
                &vote.validator_id,
                OutboxKind::ValidationSettled,
                &json!({
                    "clip_id": clip_id,
                    "decision": decision,
                    "agreed": effect.agreed,
                    "reward": effect.reward,
                    "trust_score": effect.trust_score,
                }),
                now,
            )?;
            validators.push(effect);
        }

        let remix_depth = royalty::remix_depth(uow, clip_id)?;
        let (owner_reward, royalty) = match decision {
            ClipStatus::Approved => self.pay_owner(uow, &clip, now)?,
            _ => (0, None),
        };

        let kind = match decision {
            ClipStatus::Approved => OutboxKind::ClipApproved,
            _ => OutboxKind::ClipRejected,
        };
        outbox::enqueue(
            uow,
            &clip.owner_id,
            kind,
            &json!({
                "clip_id": clip_id,
                "decision": decision,
                "approvals": tally.approvals,
                "rejections": tally.rejections,
                "reward": owner_reward,
                "remix_depth": remix_depth,
            }),
            now,
        )?;

        tracing::info!(
            clip_id,
            decision = %decision,
            approvals = tally.approvals,
            rejections = tally.rejections,
            owner_reward,
            "clip settled"
        );

        Ok(ConsensusOutcome::Settled(Settlement {
            clip_id: clip_id.to_string(),
            decision,
            tally,
            validators,
            owner_reward,
            royalty,
            remix_depth,
        }))
    }

    fn apply_validator(
        &self,
        uow: &UnitOfWork<'_>,
        clip: &ClipRow,
        validator_id: &str,
        agreed: bool,
        now: Timestamp,
    ) -> Result<ValidatorEffect> {
        let cfg = &self.config;
        let (reward, delta) = if agreed {
            let award = self.payouts.award(
                uow,
                validator_id,
                RewardAction::CorrectValidation,
                &format!("Correct validation of clip {}", clip.id),
                Some(&clip.id),
                now,
            )?;
            (award.amount, cfg.trust_reward)
        } else {
            (0, -cfg.trust_penalty)
        };

        let trust_score =
            profiles::adjust_trust(uow, validator_id, delta, cfg.trust_floor, cfg.trust_ceiling)?;

        Ok(ValidatorEffect {
            validator_id: validator_id.to_string(),
            agreed,
            reward,
            trust_score,
        })
    }

    fn pay_owner(
        &self,
        uow: &UnitOfWork<'_>,
        clip: &ClipRow,
        now: Timestamp,
    ) -> Result<(i64, Option<RoyaltyPayout>)> {
        if let Some(parent) = royalty::resolve_parent(uow, clip)? {
            let base = self.payouts.rates().amount(uow, RewardAction::ClipApproved)?;
            let payout = self.royalty.settle(uow, clip, &parent, base, now)?;
            return Ok((payout.remixer_amount, Some(payout)));
        }

        let award = self.payouts.award(
            uow,
            &clip.owner_id,
            RewardAction::ClipApproved,
            &format!("Clip {} approved", clip.id),
            Some(&clip.id),
            now,
        )?;
        Ok((award.amount, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_db::queries::clips::NewClip;
    use vox_db::queries::profiles::NewProfile;
    use vox_ledger::{ledger, PayoutConfig, RateCache};
    use vox_types::{Role, TransactionKind};

    fn engine() -> ConsensusEngine {
        let payouts = PayoutEngine::new(Arc::new(RateCache::default()), PayoutConfig::default());
        ConsensusEngine::new(
            ConsensusConfig::default(),
            Arc::new(payouts),
            RoyaltySplit::default(),
        )
    }

    fn setup(validators: &[&str]) -> Connection {
        let conn = vox_db::open_memory().expect("open");
        profiles::insert(&conn, &NewProfile::new("owner"), 0).expect("owner");
        for v in validators {
            profiles::insert(&conn, &NewProfile::new(v), 0).expect("validator");
        }
        clips::insert(
            &conn,
            &NewClip {
                id: "c1",
                owner_id: "owner",
                language: "en",
                parent_clip_id: None,
            },
            0,
        )
        .expect("clip");
        conn
    }

    fn vote(conn: &Connection, validator: &str, is_valid: bool) {
        votes::insert(conn, "c1", validator, is_valid, None, 1).expect("vote");
        clips::increment_vote_count(conn, "c1").expect("count");
    }

    #[test]
    fn test_majority() {
        let mut cfg = ConsensusConfig::default();
        assert_eq!(cfg.majority(), 3);
        cfg.threshold = 4;
        assert_eq!(cfg.majority(), 3);
        cfg.threshold = 5;
        assert_eq!(cfg.majority(), 4);
        cfg.threshold = 1;
        assert_eq!(cfg.majority(), 2);
    }

    #[test]
    fn test_decide() {
        let cfg = ConsensusConfig::default();
        let t = |approvals, rejections| Tally {
            approvals,
            rejections,
        };
        assert_eq!(cfg.decide(t(2, 0)), None);
        assert_eq!(cfg.decide(t(2, 1)), None);
        assert_eq!(cfg.decide(t(3, 0)), Some(ClipStatus::Approved));
        assert_eq!(cfg.decide(t(3, 1)), Some(ClipStatus::Approved));
        assert_eq!(cfg.decide(t(1, 3)), Some(ClipStatus::Rejected));
        assert_eq!(cfg.decide(t(2, 2)), None);
    }

    #[test]
    fn test_two_of_three_stays_pending() {
        let mut conn = setup(&["v1", "v2", "v3"]);
        vote(&conn, "v1", true);
        vote(&conn, "v2", true);
        vote(&conn, "v3", false);

        let outcome = engine().check(&mut conn, "c1", 10).expect("check");
        assert_eq!(
            outcome,
            ConsensusOutcome::Pending {
                approvals: 2,
                rejections: 1
            }
        );
        let clip = clips::find(&conn, "c1").expect("find").expect("exists");
        assert_eq!(clip.status, ClipStatus::Pending);
        assert!(ledger::history(&conn, "owner", 10).expect("history").is_empty());
    }

    #[test]
    fn test_three_of_four_approves() {
        let mut conn = setup(&["v1", "v2", "v3", "v4"]);
        vote(&conn, "v1", true);
        vote(&conn, "v2", true);
        vote(&conn, "v3", false);
        vote(&conn, "v4", true);

        let outcome = engine().check(&mut conn, "c1", 10).expect("check");
        let ConsensusOutcome::Settled(settlement) = outcome else {
            unreachable!("expected settlement, got {outcome:?}");
        };
        assert_eq!(settlement.decision, ClipStatus::Approved);
        assert_eq!(settlement.owner_reward, 100_000);

        assert_eq!(profiles::get(&conn, "owner").expect("owner").balance, 100_000);
        for v in ["v1", "v2", "v4"] {
            let p = profiles::get(&conn, v).expect("validator");
            assert_eq!(p.balance, 20_000);
            assert_eq!(p.trust_score, 102);
        }
        let dissenter = profiles::get(&conn, "v3").expect("validator");
        assert_eq!(dissenter.balance, 0);
        assert_eq!(dissenter.trust_score, 95);

        let clip = clips::find(&conn, "c1").expect("find").expect("exists");
        assert_eq!(clip.status, ClipStatus::Approved);
        assert_eq!(clip.settled_at, Some(10));

        let owner_rows = outbox::for_user(&conn, "owner").expect("outbox");
        assert_eq!(owner_rows.len(), 1);
        assert_eq!(owner_rows[0].kind, OutboxKind::ClipApproved);
        assert_eq!(outbox::pending(&conn, 100).expect("pending").len(), 5);
    }

    #[test]
    fn test_rejection_pays_nothing() {
        let mut conn = setup(&["v1", "v2", "v3"]);
        for v in ["v1", "v2", "v3"] {
            vote(&conn, v, false);
        }

        let outcome = engine().check(&mut conn, "c1", 10).expect("check");
        assert!(outcome.is_settled());
        assert_eq!(profiles::get(&conn, "owner").expect("owner").balance, 0);
        for v in ["v1", "v2", "v3"] {
            assert_eq!(profiles::get(&conn, v).expect("v").balance, 20_000);
        }
        let owner_rows = outbox::for_user(&conn, "owner").expect("outbox");
        assert_eq!(owner_rows[0].kind, OutboxKind::ClipRejected);
    }

    #[test]
    fn test_second_check_is_noop() {
        let mut conn = setup(&["v1", "v2", "v3"]);
        for v in ["v1", "v2", "v3"] {
            vote(&conn, v, true);
        }
        let engine = engine();
        assert!(engine.check(&mut conn, "c1", 10).expect("first").is_settled());
        let second = engine.check(&mut conn, "c1", 11).expect("second");
        assert_eq!(
            second,
            ConsensusOutcome::AlreadySettled {
                status: ClipStatus::Approved
            }
        );
        assert_eq!(ledger::history(&conn, "owner", 10).expect("history").len(), 1);
    }

    #[test]
    fn test_trust_clamped() {
        let mut conn = setup(&[]);
        profiles::insert(&conn, &NewProfile::new("high").with_trust(199), 0).expect("high");
        profiles::insert(&conn, &NewProfile::new("mid").with_trust(150), 0).expect("mid");
        profiles::insert(&conn, &NewProfile::new("low").with_trust(3), 0).expect("low");
        vote(&conn, "high", true);
        vote(&conn, "mid", true);
        vote(&conn, "low", false);
        profiles::insert(&conn, &NewProfile::new("v4"), 0).expect("v4");
        vote(&conn, "v4", true);

        engine().check(&mut conn, "c1", 10).expect("check");
        assert_eq!(profiles::get(&conn, "high").expect("p").trust_score, 200);
        assert_eq!(profiles::get(&conn, "low").expect("p").trust_score, 0);
    }

    #[test]
    fn test_validator_multiplier_applies() {
        let mut conn = setup(&["v1", "v2"]);
        profiles::insert(&conn, &NewProfile::new("pro").with_role(Role::Validator), 0)
            .expect("pro");
        vote(&conn, "v1", true);
        vote(&conn, "v2", true);
        vote(&conn, "pro", true);

        engine().check(&mut conn, "c1", 10).expect("check");
        assert_eq!(profiles::get(&conn, "pro").expect("p").balance, 28_000);
    }

    #[test]
    fn test_remix_split_on_approval() {
        let mut conn = setup(&["v1", "v2", "v3"]);
        profiles::insert(&conn, &NewProfile::new("remixer"), 0).expect("remixer");
        clips::insert(
            &conn,
            &NewClip {
                id: "d1",
                owner_id: "remixer",
                language: "en",
                parent_clip_id: Some("c1"),
            },
            0,
        )
        .expect("derivative");
        for v in ["v1", "v2", "v3"] {
            votes::insert(&conn, "d1", v, true, None, 1).expect("vote");
        }

        let outcome = engine().check(&mut conn, "d1", 10).expect("check");
        let ConsensusOutcome::Settled(settlement) = outcome else {
            unreachable!("expected settlement, got {outcome:?}");
        };
        assert_eq!(settlement.owner_reward, 70_000);
        assert_eq!(settlement.remix_depth, 1);
        assert_eq!(profiles::get(&conn, "remixer").expect("p").balance, 70_000);
        assert_eq!(profiles::get(&conn, "owner").expect("p").balance, 30_000);
    }

    #[test]
    fn test_orphaned_remix_paid_as_ordinary_clip() {
        let mut conn = setup(&["v1", "v2", "v3"]);
        profiles::insert(&conn, &NewProfile::new("remixer").referred_by("owner"), 0)
            .expect("remixer");
        clips::insert(
            &conn,
            &NewClip {
                id: "d1",
                owner_id: "remixer",
                language: "en",
                parent_clip_id: Some("missing"),
            },
            0,
        )
        .expect("derivative");
        for v in ["v1", "v2", "v3"] {
            votes::insert(&conn, "d1", v, true, None, 1).expect("vote");
        }

        engine().check(&mut conn, "d1", 10).expect("check");
        assert_eq!(profiles::get(&conn, "remixer").expect("p").balance, 100_000);
        let referrer = profiles::get(&conn, "owner").expect("p");
        assert_eq!(referrer.balance, 5_000);
        let bonus = ledger::history(&conn, "owner", 10).expect("history");
        assert_eq!(bonus[0].kind, TransactionKind::Bonus);
    }

    #[test]
    fn test_missing_rate_rolls_back_settlement() {
        let mut conn = setup(&["v1", "v2", "v3"]);
        vox_db::queries::rates::deactivate(&conn, "clip_approved").expect("deactivate");
        for v in ["v1", "v2", "v3"] {
            vote(&conn, v, true);
        }

        let err = engine().check(&mut conn, "c1", 10).expect_err("missing rate");
        assert_eq!(err.code(), "missing_reward_rate");

        let clip = clips::find(&conn, "c1").expect("find").expect("exists");
        assert_eq!(clip.status, ClipStatus::Pending);
        for v in ["v1", "v2", "v3"] {
            let p = profiles::get(&conn, v).expect("p");
            assert_eq!((p.balance, p.trust_score), (0, 100));
        }
        assert!(outbox::pending(&conn, 100).expect("pending").is_empty());
    }

    #[test]
    fn test_unknown_clip() {
        let mut conn = setup(&[]);
        let err = engine().check(&mut conn, "nope", 0).expect_err("missing");
        assert!(matches!(err, ConsensusError::ClipNotFound(_)));
    }
}
