//! Withdrawal state machine.
//!
//! ```text
//! pending ──► processing ──► completed
//!    │             │
//!    └─────────────┴──────► failed | refunded
//! ```
//!
//! Every transition here runs in its own unit of work and is idempotent:
//! a repeated lock with the same idempotency key returns the existing
//! request, and a terminal request ignores further outcomes.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use vox_crypto::blake3::transfer_reference;
use vox_crypto::{mask, AccountCipher};
use vox_db::queries::payouts::{self, NewPayout, PayoutRow};
use vox_db::queries::{outbox, profiles};
use vox_db::{transact, UnitOfWork};
use vox_ledger::{ledger, LedgerError};
use vox_types::{OutboxKind, PayoutStatus, Timestamp, MICROS_PER_USD, SECONDS_PER_DAY};

use crate::exchange::ExchangeRateProvider;
use crate::{PaymentError, Result};

/// Withdrawal limits and payout currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WithdrawalConfig {
    /// Smallest accepted withdrawal, in micros.
    pub min_amount: i64,
    /// Largest trailing-24 h total per user, in micros.
    pub daily_cap: i64,
    /// Payout currency sent to the provider.
    pub currency: String,
    /// Upper bound on the provider round trip.
    pub provider_timeout_secs: u64,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            min_amount: MICROS_PER_USD,
            daily_cap: 50 * MICROS_PER_USD,
            currency: "NGN".to_string(),
            provider_timeout_secs: 30,
        }
    }
}

/// A client's withdrawal request.
#[derive(Clone, Deserialize)]
pub struct WithdrawalRequest {
    pub user_id: String,
    /// Amount in micros.
    pub amount: i64,
    pub account_number: String,
    pub bank_code: String,
    pub account_name: String,
    pub idempotency_key: String,
}

impl std::fmt::Debug for WithdrawalRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithdrawalRequest")
            .field("user_id", &self.user_id)
            .field("amount", &self.amount)
            .field("account_number", &mask(&self.account_number))
            .field("bank_code", &self.bank_code)
            .field("idempotency_key", &self.idempotency_key)
            .finish_non_exhaustive()
    }
}

impl WithdrawalRequest {
    fn check_fields(&self) -> Result<()> {
        let missing = [
            ("idempotency_key", &self.idempotency_key),
            ("account_number", &self.account_number),
            ("bank_code", &self.bank_code),
            ("account_name", &self.account_name),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        match missing {
            Some((field, _)) => Err(PaymentError::InvalidRequest(format!("{field} is required"))),
            None => Ok(()),
        }
    }
}

/// Result of [`lock`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locked {
    pub request: PayoutRow,
    /// `false` when the idempotency key matched an existing request.
    pub created: bool,
}

/// Result of applying a provider outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "status", rename_all = "snake_case")]
pub enum Transition {
    /// The request moved to this status.
    Applied(PayoutStatus),
    /// The request was already terminal with this status; nothing changed.
    Unchanged(PayoutStatus),
}

/// Validate a request, lock its funds and persist it as `pending`.
///
/// Steps run in one unit of work, in order: idempotency lookup, minimum,
/// daily cap, balance lock, insert. The unique idempotency key makes a
/// racing duplicate resolve to the existing row.
pub fn lock(
    conn: &mut Connection,
    config: &WithdrawalConfig,
    cipher: &AccountCipher,
    exchange: &dyn ExchangeRateProvider,
    request: &WithdrawalRequest,
    now: Timestamp,
) -> Result<Locked> {
    request.check_fields()?;

    let account_encrypted = cipher.encrypt(&request.account_number)?;
    let account_masked = mask(&request.account_number);
    let reference = transfer_reference(&request.idempotency_key);

    let result = transact(conn, |uow| -> Result<Locked> {
        if let Some(existing) = payouts::find_by_key(uow, &request.idempotency_key)? {
            return replay(existing, &request.user_id);
        }

        if request.amount < config.min_amount {
            return Err(PaymentError::BelowMinimum {
                amount: request.amount,
                minimum: config.min_amount,
            });
        }

        let since = now.saturating_sub(SECONDS_PER_DAY);
        let used = payouts::total_since(uow, &request.user_id, since)?;
        if used.saturating_add(request.amount) > config.daily_cap {
            return Err(PaymentError::DailyLimitExceeded {
                requested: request.amount,
                used,
                cap: config.daily_cap,
            });
        }

        if profiles::find(uow, &request.user_id)?.is_none() {
            return Err(LedgerError::ProfileNotFound(request.user_id.clone()).into());
        }
        ledger::lock_funds(uow, &request.user_id, request.amount, &reference, now)?;

        let amount_minor = exchange.usd_to_minor_units(request.amount)?;
        let id = payouts::insert(
            uow,
            &NewPayout {
                idempotency_key: &request.idempotency_key,
                user_id: &request.user_id,
                amount: request.amount,
                amount_minor,
                currency: &config.currency,
                account_name: &request.account_name,
                bank_code: &request.bank_code,
                account_masked: &account_masked,
                account_encrypted: &account_encrypted,
                reference: &reference,
            },
            now,
        )?;

        let row = payouts::find_by_id(uow, id)?
            .ok_or_else(|| PaymentError::RequestNotFound(reference.clone()))?;
        Ok(Locked {
            request: row,
            created: true,
        })
    });

    match result {
        Ok(locked) => {
            if locked.created {
                tracing::info!(
                    user_id = %request.user_id,
                    amount = request.amount,
                    reference = %locked.request.reference,
                    "withdrawal funds locked"
                );
            }
            Ok(locked)
        }
        Err(PaymentError::Db(e)) if e.is_unique_violation() => {
            let existing = payouts::find_by_key(conn, &request.idempotency_key)?
                .ok_or(PaymentError::Db(e))?;
            replay(existing, &request.user_id)
        }
        Err(e) => Err(e),
    }
}

fn replay(existing: PayoutRow, user_id: &str) -> Result<Locked> {
    if existing.user_id != user_id {
        tracing::warn!(user_id, "idempotency key presented by a different user");
        return Err(PaymentError::IdempotencyKeyReused);
    }
    tracing::debug!(reference = %existing.reference, "duplicate withdrawal request");
    Ok(Locked {
        request: existing,
        created: false,
    })
}

/// Record that the provider accepted the transfer.
///
/// Returns `false` when the request already left `pending` (a fast webhook
/// may have settled it first).
pub fn mark_processing(
    conn: &mut Connection,
    reference: &str,
    recipient_code: &str,
    transfer_code: &str,
    now: Timestamp,
) -> Result<bool> {
    transact(conn, |uow| {
        let row = find(uow, reference)?;
        Ok(payouts::mark_processing(uow, row.id, recipient_code, transfer_code, now)?)
    })
}

/// The transfer went out: release the locked amount.
pub fn complete(conn: &mut Connection, reference: &str, now: Timestamp) -> Result<Transition> {
    transact(conn, |uow| {
        let row = find(uow, reference)?;
        if row.status.is_terminal() {
            if row.status.is_returned() {
                tracing::warn!(reference, status = %row.status, "success reported for returned withdrawal");
            }
            return Ok(Transition::Unchanged(row.status));
        }

        payouts::finish(uow, row.id, PayoutStatus::Completed, None, now)?;
        ledger::release_locked(uow, &row.user_id, row.locked_amount, reference, now)?;
        notify(uow, &row, PayoutStatus::Completed, None, now)?;

        tracing::info!(
            user_id = %row.user_id,
            amount = row.amount,
            reference,
            "withdrawal completed"
        );
        Ok(Transition::Applied(PayoutStatus::Completed))
    })
}

/// The transfer failed or was reversed: return the locked amount.
///
/// `status` must be `Failed` or `Refunded`.
pub fn refund(
    conn: &mut Connection,
    reference: &str,
    status: PayoutStatus,
    reason: Option<&str>,
    now: Timestamp,
) -> Result<Transition> {
    if !status.is_returned() {
        return Err(PaymentError::InvalidRequest(format!(
            "cannot refund into status {status}"
        )));
    }

    transact(conn, |uow| {
        let row = find(uow, reference)?;
        if row.status.is_terminal() {
            if row.status == PayoutStatus::Completed {
                tracing::warn!(reference, "reversal reported for completed withdrawal");
            }
            return Ok(Transition::Unchanged(row.status));
        }

        payouts::finish(uow, row.id, status, reason, now)?;
        let description = match reason {
            Some(reason) => format!("Withdrawal {status}: {reason}"),
            None => format!("Withdrawal {status}"),
        };
        ledger::refund_locked(
            uow,
            &row.user_id,
            row.locked_amount,
            reference,
            &description,
            now,
        )?;
        notify(uow, &row, status, reason, now)?;

        tracing::warn!(
            user_id = %row.user_id,
            amount = row.amount,
            reference,
            status = %status,
            reason = reason.unwrap_or(""),
            "withdrawal refunded"
        );
        Ok(Transition::Applied(status))
    })
}

/// Look up a request by its transfer reference.
pub fn find(conn: &Connection, reference: &str) -> Result<PayoutRow> {
    payouts::find_by_reference(conn, reference)?
        .ok_or_else(|| PaymentError::RequestNotFound(reference.to_string()))
}

fn notify(
    uow: &UnitOfWork<'_>,
    row: &PayoutRow,
    status: PayoutStatus,
    reason: Option<&str>,
    now: Timestamp,
) -> Result<()> {
    let kind = if status == PayoutStatus::Completed {
        OutboxKind::WithdrawalCompleted
    } else {
        OutboxKind::WithdrawalFailed
    };
    outbox::enqueue(
        uow,
        &row.user_id,
        kind,
        &json!({
            "request_id": row.id,
            "reference": row.reference,
            "amount": row.amount,
            "status": status,
            "reason": reason,
        }),
        now,
    )?;
    Ok(())
}
