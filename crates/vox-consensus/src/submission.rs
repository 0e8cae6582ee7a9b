//! Validation submission handler.
//!
//! Preconditions are checked in a fixed order and the first failure wins:
//!
//! 1. Cooldown since the validator's last accepted submission
//! 2. Clip exists
//! 3. Validator is not the clip owner
//! 4. Validator has not voted on this clip
//! 5. Validator's trust score exceeds the minimum
//! 6. Validator speaks the clip's language (skipped when none declared)
//!
//! The vote, progression counters, the clip's vote counter and the
//! progression outbox row commit together. The consensus check then runs in
//! its own unit of work.
//!
//! A late vote on a clip that already settled is still recorded and counted,
//! but emits no `validator_progress` row.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use vox_db::queries::{clips, outbox, profiles, votes};
use vox_db::transact;
use vox_types::{ClipStatus, OutboxKind, Timestamp, VoteId};

use crate::consensus::{ConsensusEngine, ConsensusOutcome};
use crate::cooldown::CooldownTracker;
use crate::SubmitError;

/// Default trust score a validator must exceed.
pub const DEFAULT_MIN_TRUST_TO_VALIDATE: i64 = 20;

/// Validation intake tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub cooldown_secs: u64,
    pub min_trust_to_validate: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: crate::cooldown::DEFAULT_COOLDOWN_SECS,
            min_trust_to_validate: DEFAULT_MIN_TRUST_TO_VALIDATE,
        }
    }
}

/// A validator's vote on a clip.
#[derive(Clone, Debug, Deserialize)]
pub struct Submission {
    pub validator_id: String,
    pub clip_id: String,
    pub is_valid: bool,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// Result of an accepted submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub success: bool,
    pub vote_id: VoteId,
    pub message: String,
    pub consensus_reached: bool,
}

/// Accepts votes and drives consensus.
#[derive(Debug)]
pub struct ValidationService {
    config: ValidationConfig,
    cooldown: Arc<CooldownTracker>,
    consensus: Arc<ConsensusEngine>,
}

impl ValidationService {
    pub fn new(
        config: ValidationConfig,
        cooldown: Arc<CooldownTracker>,
        consensus: Arc<ConsensusEngine>,
    ) -> Self {
        Self {
            config,
            cooldown,
            consensus,
        }
    }

    pub fn cooldown(&self) -> &Arc<CooldownTracker> {
        &self.cooldown
    }

    pub fn consensus(&self) -> &Arc<ConsensusEngine> {
        &self.consensus
    }

    /// Record a vote and check the clip for consensus.
    pub fn submit(
        &self,
        conn: &mut Connection,
        submission: &Submission,
        now: Timestamp,
    ) -> Result<SubmissionOutcome, SubmitError> {
        let validator_id = submission.validator_id.as_str();
        let clip_id = submission.clip_id.as_str();

        self.cooldown
            .try_acquire(validator_id, now)
            .map_err(|retry_after_secs| SubmitError::RateLimited { retry_after_secs })?;

        let clip = clips::find(conn, clip_id)?
            .ok_or_else(|| SubmitError::ClipNotFound(clip_id.to_string()))?;

        if clip.owner_id == validator_id {
            return Err(SubmitError::SelfValidation);
        }

        if votes::exists(conn, clip_id, validator_id)? {
            return Err(SubmitError::AlreadyVoted(clip_id.to_string()));
        }

        let validator = profiles::find(conn, validator_id)?
            .ok_or_else(|| SubmitError::ProfileNotFound(validator_id.to_string()))?;

        if validator.trust_score <= self.config.min_trust_to_validate {
            return Err(SubmitError::InsufficientTrust {
                score: validator.trust_score,
                minimum: self.config.min_trust_to_validate,
            });
        }

        if !speaks(&validator.languages, &clip.language) {
            return Err(SubmitError::LanguageMismatch {
                clip_language: clip.language,
            });
        }

        let vote_id = transact(conn, |uow| -> Result<VoteId, SubmitError> {
            let vote_id = votes::insert(
                uow,
                clip_id,
                validator_id,
                submission.is_valid,
                submission.feedback.as_deref(),
                now,
            )
            .map_err(|e| {
                if e.is_unique_violation() {
                    SubmitError::AlreadyVoted(clip_id.to_string())
                } else {
                    SubmitError::Db(e)
                }
            })?;

            let progression = profiles::record_validation(uow, validator_id, now)?;
            let vote_count = clips::increment_vote_count(uow, clip_id)?;

            if clip.status == ClipStatus::Pending {
                outbox::enqueue(
                    uow,
                    validator_id,
                    OutboxKind::ValidatorProgress,
                    &json!({
                        "clip_id": clip_id,
                        "vote_id": vote_id,
                        "daily_validations": progression.daily_validations,
                        "total_validations": progression.total_validations,
                        "active_days": progression.active_days,
                    }),
                    now,
                )?;
            }

            tracing::info!(
                clip_id,
                validator_id,
                vote_id,
                is_valid = submission.is_valid,
                vote_count,
                "validation recorded"
            );
            Ok(vote_id)
        })?;

        let outcome = self.consensus.check(conn, clip_id, now)?;
        let (consensus_reached, message) = match &outcome {
            ConsensusOutcome::Settled(settlement) => (
                true,
                format!("Validation submitted. Consensus reached: {}", settlement.decision),
            ),
            ConsensusOutcome::Pending { .. } => (false, "Validation submitted".to_string()),
            ConsensusOutcome::AlreadySettled { status } => (
                false,
                format!("Validation submitted. Clip already {status}"),
            ),
        };

        Ok(SubmissionOutcome {
            success: true,
            vote_id,
            message,
            consensus_reached,
        })
    }
}

/// Case-insensitive substring match in either direction. An empty language
/// list speaks everything.
fn speaks(languages: &[String], clip_language: &str) -> bool {
    if languages.is_empty() {
        return true;
    }
    let tag = clip_language.to_lowercase();
    languages.iter().any(|language| {
        let language = language.trim().to_lowercase();
        !language.is_empty() && (tag.contains(&language) || language.contains(&tag))
    })
}
