//! Append-only ledger.
//!
//! Every balance change is one atomic `UPDATE` on the profile row paired with
//! one row in `transactions`, both inside the caller's [`UnitOfWork`]. Nothing
//! here reads a balance and writes it back.
//!
//! Each entry carries two deltas:
//!
//! - `amount`: change to the available balance
//! - `locked_delta`: change to the pending (locked) balance
//!
//! so that for every profile `balance == Σ amount` and
//! `pending_balance == Σ locked_delta`.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use vox_db::UnitOfWork;
use vox_types::{Timestamp, TransactionKind};

use crate::{LedgerError, Result};

/// A persisted ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: i64,
    pub user_id: String,
    pub amount: i64,
    pub locked_delta: i64,
    pub kind: TransactionKind,
    pub description: String,
    pub reference_id: Option<String>,
    pub created_at: Timestamp,
}

/// Balance snapshot for one profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Balances {
    pub available: i64,
    pub pending: i64,
    pub lifetime_earned: i64,
}

/// Add `amount` to the available balance.
///
/// `Earning` and `Bonus` credits also raise `lifetime_earned`.
pub fn credit(
    uow: &UnitOfWork<'_>,
    user_id: &str,
    amount: i64,
    kind: TransactionKind,
    description: &str,
    reference: Option<&str>,
    now: Timestamp,
) -> Result<i64> {
    ensure_positive(amount)?;
    let earned = if kind.counts_as_earning() { amount } else { 0 };

    let updated = uow.execute(
        "UPDATE profiles
         SET balance = balance + ?2, lifetime_earned = lifetime_earned + ?3
         WHERE user_id = ?1",
        params![user_id, amount, earned],
    )?;
    if updated == 0 {
        return Err(LedgerError::ProfileNotFound(user_id.to_string()));
    }

    append(uow, user_id, amount, 0, kind, description, reference, now)
}

/// Subtract `amount` from the available balance.
pub fn debit(
    uow: &UnitOfWork<'_>,
    user_id: &str,
    amount: i64,
    kind: TransactionKind,
    description: &str,
    reference: Option<&str>,
    now: Timestamp,
) -> Result<i64> {
    ensure_positive(amount)?;

    let updated = uow.execute(
        "UPDATE profiles SET balance = balance - ?2
         WHERE user_id = ?1 AND balance >= ?2",
        params![user_id, amount],
    )?;
    if updated == 0 {
        return Err(insufficient(uow, user_id, amount)?);
    }

    append(uow, user_id, -amount, 0, kind, description, reference, now)
}

/// Move `amount` from available to pending ahead of a withdrawal.
pub fn lock_funds(
    uow: &UnitOfWork<'_>,
    user_id: &str,
    amount: i64,
    reference: &str,
    now: Timestamp,
) -> Result<i64> {
    ensure_positive(amount)?;

    let updated = uow.execute(
        "UPDATE profiles
         SET balance = balance - ?2, pending_balance = pending_balance + ?2
         WHERE user_id = ?1 AND balance >= ?2",
        params![user_id, amount],
    )?;
    if updated == 0 {
        return Err(insufficient(uow, user_id, amount)?);
    }

    append(
        uow,
        user_id,
        -amount,
        amount,
        TransactionKind::FundLock,
        "Funds locked for withdrawal",
        Some(reference),
        now,
    )
}

/// Drop `amount` from pending once the transfer has gone out.
pub fn release_locked(
    uow: &UnitOfWork<'_>,
    user_id: &str,
    amount: i64,
    reference: &str,
    now: Timestamp,
) -> Result<i64> {
    ensure_positive(amount)?;

    let updated = uow.execute(
        "UPDATE profiles SET pending_balance = pending_balance - ?2
         WHERE user_id = ?1 AND pending_balance >= ?2",
        params![user_id, amount],
    )?;
    if updated == 0 {
        return Err(insufficient_locked(uow, user_id, amount)?);
    }

    append(
        uow,
        user_id,
        0,
        -amount,
        TransactionKind::Withdrawal,
        "Withdrawal completed",
        Some(reference),
        now,
    )
}

/// Return `amount` from pending to available after a failed or reversed transfer.
pub fn refund_locked(
    uow: &UnitOfWork<'_>,
    user_id: &str,
    amount: i64,
    reference: &str,
    description: &str,
    now: Timestamp,
) -> Result<i64> {
    ensure_positive(amount)?;

    let updated = uow.execute(
        "UPDATE profiles
         SET pending_balance = pending_balance - ?2, balance = balance + ?2
         WHERE user_id = ?1 AND pending_balance >= ?2",
        params![user_id, amount],
    )?;
    if updated == 0 {
        return Err(insufficient_locked(uow, user_id, amount)?);
    }

    append(
        uow,
        user_id,
        amount,
        -amount,
        TransactionKind::Refund,
        description,
        Some(reference),
        now,
    )
}

/// Current balances for a profile.
pub fn balances(conn: &Connection, user_id: &str) -> Result<Balances> {
    conn.query_row(
        "SELECT balance, pending_balance, lifetime_earned FROM profiles WHERE user_id = ?1",
        [user_id],
        |row| {
            Ok(Balances {
                available: row.get(0)?,
                pending: row.get(1)?,
                lifetime_earned: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| LedgerError::ProfileNotFound(user_id.to_string()))
}

const ENTRY_COLUMNS: &str =
    "id, user_id, amount, locked_delta, tx_type, description, reference_id, created_at";

fn map_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    let kind: String = row.get(4)?;
    let kind = kind.parse::<TransactionKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Entry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        locked_delta: row.get(3)?,
        kind,
        description: row.get(5)?,
        reference_id: row.get(6)?,
        created_at: row.get::<_, i64>(7)? as u64,
    })
}

/// Most recent ledger entries for a profile, newest first.
pub fn history(conn: &Connection, user_id: &str, limit: u32) -> Result<Vec<Entry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM transactions WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![user_id, limit], map_entry)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Entries carrying a given reference, oldest first.
pub fn entries_for_reference(conn: &Connection, reference: &str) -> Result<Vec<Entry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM transactions WHERE reference_id = ?1 ORDER BY id ASC"
    ))?;
    let rows = stmt.query_map([reference], map_entry)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Sum of `(amount, locked_delta)` over every entry for a profile.
///
/// Equals `(balance, pending_balance)` when the ledger is consistent.
pub fn log_totals(conn: &Connection, user_id: &str) -> Result<(i64, i64)> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(amount), 0), COALESCE(SUM(locked_delta), 0)
         FROM transactions WHERE user_id = ?1",
        [user_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?)
}

/// Whether the stored balances match the sums of the log.
pub fn reconciles(conn: &Connection, user_id: &str) -> Result<bool> {
    let balances = balances(conn, user_id)?;
    let (available, pending) = log_totals(conn, user_id)?;
    Ok(balances.available == available && balances.pending == pending)
}

#[allow(clippy::too_many_arguments)]
fn append(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    locked_delta: i64,
    kind: TransactionKind,
    description: &str,
    reference: Option<&str>,
    now: Timestamp,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO transactions
             (user_id, amount, locked_delta, tx_type, description, reference_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user_id,
            amount,
            locked_delta,
            kind.as_str(),
            description,
            reference,
            now as i64
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn ensure_positive(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

fn insufficient(conn: &Connection, user_id: &str, required: i64) -> Result<LedgerError> {
    let available = balances(conn, user_id)?.available;
    Ok(LedgerError::InsufficientBalance {
        required,
        available,
    })
}

fn insufficient_locked(conn: &Connection, user_id: &str, required: i64) -> Result<LedgerError> {
    let locked = balances(conn, user_id)?.pending;
    Ok(LedgerError::InsufficientLocked { required, locked })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vox_db::queries::profiles::{self, NewProfile};
    use vox_db::transact;

    fn setup() -> Connection {
        let conn = vox_db::open_memory().expect("open");
        profiles::insert(&conn, &NewProfile::new("alice"), 0).expect("insert");
        conn
    }

    fn top_up(conn: &mut Connection, amount: i64) {
        transact(conn, |uow| {
            credit(uow, "alice", amount, TransactionKind::TopUp, "top up", None, 1)
        })
        .expect("top up");
    }

    #[test]
    fn test_credit_updates_balance_and_log() {
        let mut conn = setup();
        transact(&mut conn, |uow| {
            credit(uow, "alice", 100_000, TransactionKind::Earning, "Clip approved", Some("c1"), 5)
        })
        .expect("credit");

        let b = balances(&conn, "alice").expect("balances");
        assert_eq!(b.available, 100_000);
        assert_eq!(b.lifetime_earned, 100_000);

        let log = history(&conn, "alice", 10).expect("history");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, TransactionKind::Earning);
        assert_eq!(log[0].reference_id.as_deref(), Some("c1"));
        assert!(reconciles(&conn, "alice").expect("reconcile"));
    }

    #[test]
    fn test_top_up_not_counted_as_earning() {
        let mut conn = setup();
        top_up(&mut conn, 50_000);
        let b = balances(&conn, "alice").expect("balances");
        assert_eq!(b.available, 50_000);
        assert_eq!(b.lifetime_earned, 0);
    }

    #[test]
    fn test_credit_unknown_profile() {
        let mut conn = setup();
        let err = transact(&mut conn, |uow| {
            credit(uow, "ghost", 1, TransactionKind::Earning, "x", None, 0)
        })
        .expect_err("should fail");
        assert!(matches!(err, LedgerError::ProfileNotFound(_)));
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let mut conn = setup();
        for amount in [0, -5] {
            let err = transact(&mut conn, |uow| {
                credit(uow, "alice", amount, TransactionKind::Earning, "x", None, 0)
            })
            .expect_err("should fail");
            assert!(matches!(err, LedgerError::InvalidAmount(_)));
        }
    }

    #[test]
    fn test_debit_insufficient() {
        let mut conn = setup();
        top_up(&mut conn, 10);
        let err = transact(&mut conn, |uow| {
            debit(uow, "alice", 11, TransactionKind::Penalty, "x", None, 0)
        })
        .expect_err("should fail");
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                required: 11,
                available: 10
            }
        ));
        assert_eq!(history(&conn, "alice", 10).expect("history").len(), 1);
    }

    #[test]
    fn test_lock_release_cycle() {
        let mut conn = setup();
        top_up(&mut conn, 5_000_000);

        transact(&mut conn, |uow| lock_funds(uow, "alice", 2_000_000, "wd_1", 2))
            .expect("lock");
        let b = balances(&conn, "alice").expect("balances");
        assert_eq!((b.available, b.pending), (3_000_000, 2_000_000));

        transact(&mut conn, |uow| release_locked(uow, "alice", 2_000_000, "wd_1", 3))
            .expect("release");
        let b = balances(&conn, "alice").expect("balances");
        assert_eq!((b.available, b.pending), (3_000_000, 0));
        assert!(reconciles(&conn, "alice").expect("reconcile"));

        let entries = entries_for_reference(&conn, "wd_1").expect("entries");
        let kinds: Vec<_> = entries.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [TransactionKind::FundLock, TransactionKind::Withdrawal]);
    }

    #[test]
    fn test_lock_refund_cycle() {
        let mut conn = setup();
        top_up(&mut conn, 5_000_000);

        transact(&mut conn, |uow| {
            lock_funds(uow, "alice", 5_000_000, "wd_2", 2)?;
            refund_locked(uow, "alice", 5_000_000, "wd_2", "Transfer failed", 3)
        })
        .expect("lock and refund");

        let b = balances(&conn, "alice").expect("balances");
        assert_eq!((b.available, b.pending), (5_000_000, 0));
        assert!(reconciles(&conn, "alice").expect("reconcile"));
    }

    #[test]
    fn test_release_more_than_locked() {
        let mut conn = setup();
        top_up(&mut conn, 100);
        transact(&mut conn, |uow| lock_funds(uow, "alice", 50, "wd_3", 2)).expect("lock");
        let err = transact(&mut conn, |uow| release_locked(uow, "alice", 60, "wd_3", 3))
            .expect_err("should fail");
        assert!(matches!(
            err,
            LedgerError::InsufficientLocked {
                required: 60,
                locked: 50
            }
        ));
    }

    #[test]
    fn test_entries_cannot_be_rewritten() {
        let mut conn = setup();
        top_up(&mut conn, 100);
        let result = conn.execute("UPDATE transactions SET amount = 1", []);
        assert!(result.is_err());
        let result = conn.execute("DELETE FROM transactions", []);
        assert!(result.is_err());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Credit(i64),
        Debit(i64),
        Lock(i64),
        Release(i64),
        Refund(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..1_000_000).prop_map(Op::Credit),
            (1i64..1_000_000).prop_map(Op::Debit),
            (1i64..1_000_000).prop_map(Op::Lock),
            (1i64..1_000_000).prop_map(Op::Release),
            (1i64..1_000_000).prop_map(Op::Refund),
        ]
    }

    proptest! {
        #[test]
        fn balances_always_match_log(ops in prop::collection::vec(op(), 1..40)) {
            let mut conn = setup();
            for (i, op) in ops.into_iter().enumerate() {
                let reference = format!("ref_{i}");
                // Rejected operations are expected; they must leave no trace.
                let _ = transact(&mut conn, |uow| match op {
                    Op::Credit(a) => credit(uow, "alice", a, TransactionKind::Earning, "e", None, 0),
                    Op::Debit(a) => debit(uow, "alice", a, TransactionKind::Penalty, "p", None, 0),
                    Op::Lock(a) => lock_funds(uow, "alice", a, &reference, 0),
                    Op::Release(a) => release_locked(uow, "alice", a, &reference, 0),
                    Op::Refund(a) => refund_locked(uow, "alice", a, &reference, "r", 0),
                });
                let b = balances(&conn, "alice").expect("balances");
                prop_assert!(b.available >= 0);
                prop_assert!(b.pending >= 0);
                prop_assert!(reconciles(&conn, "alice").expect("reconcile"));
            }
        }
    }
}
