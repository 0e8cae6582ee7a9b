//! Payout (withdrawal) request query functions.
//!
//! Status writes are guarded so that a terminal request is never modified.

use rusqlite::{Connection, OptionalExtension, Row};
use vox_types::{PayoutStatus, Timestamp};

use crate::{parse_tag, Result};

/// A payout request row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayoutRow {
    pub id: i64,
    pub idempotency_key: String,
    pub user_id: String,
    /// Requested amount in micros.
    pub amount: i64,
    /// Amount moved into the pending balance, in micros.
    pub locked_amount: i64,
    /// Amount in the provider's currency minor units.
    pub amount_minor: i64,
    pub currency: String,
    pub account_name: String,
    pub bank_code: String,
    pub account_masked: String,
    pub account_encrypted: String,
    pub status: PayoutStatus,
    pub reference: String,
    pub recipient_code: Option<String>,
    pub transfer_code: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Fields for a new payout request.
#[derive(Clone, Debug)]
pub struct NewPayout<'a> {
    pub idempotency_key: &'a str,
    pub user_id: &'a str,
    pub amount: i64,
    pub amount_minor: i64,
    pub currency: &'a str,
    pub account_name: &'a str,
    pub bank_code: &'a str,
    pub account_masked: &'a str,
    pub account_encrypted: &'a str,
    pub reference: &'a str,
}

const COLUMNS: &str = "id, idempotency_key, user_id, amount, locked_amount, amount_minor, \
     currency, account_name, bank_code, account_masked, account_encrypted, status, reference, \
     recipient_code, transfer_code, failure_reason, created_at, updated_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<PayoutRow> {
    Ok(PayoutRow {
        id: row.get(0)?,
        idempotency_key: row.get(1)?,
        user_id: row.get(2)?,
        amount: row.get(3)?,
        locked_amount: row.get(4)?,
        amount_minor: row.get(5)?,
        currency: row.get(6)?,
        account_name: row.get(7)?,
        bank_code: row.get(8)?,
        account_masked: row.get(9)?,
        account_encrypted: row.get(10)?,
        status: parse_tag(11, row.get(11)?)?,
        reference: row.get(12)?,
        recipient_code: row.get(13)?,
        transfer_code: row.get(14)?,
        failure_reason: row.get(15)?,
        created_at: row.get::<_, i64>(16)? as u64,
        updated_at: row.get::<_, i64>(17)? as u64,
    })
}

/// Insert a pending request whose full amount is locked.
///
/// A duplicate idempotency key fails with a unique-constraint error.
pub fn insert(conn: &Connection, payout: &NewPayout<'_>, now: Timestamp) -> Result<i64> {
    conn.execute(
        "INSERT INTO payout_requests (
            idempotency_key, user_id, amount, locked_amount, amount_minor, currency,
            account_name, bank_code, account_masked, account_encrypted, reference,
            created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        rusqlite::params![
            payout.idempotency_key,
            payout.user_id,
            payout.amount,
            payout.amount_minor,
            payout.currency,
            payout.account_name,
            payout.bank_code,
            payout.account_masked,
            payout.account_encrypted,
            payout.reference,
            now as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn find_by(conn: &Connection, column: &str, value: &dyn rusqlite::ToSql) -> Result<Option<PayoutRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM payout_requests WHERE {column} = ?1"),
            [value],
            map_row,
        )
        .optional()?;
    Ok(row)
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<PayoutRow>> {
    find_by(conn, "id", &id)
}

pub fn find_by_key(conn: &Connection, idempotency_key: &str) -> Result<Option<PayoutRow>> {
    find_by(conn, "idempotency_key", &idempotency_key)
}

pub fn find_by_reference(conn: &Connection, reference: &str) -> Result<Option<PayoutRow>> {
    find_by(conn, "reference", &reference)
}

/// Record the provider's recipient and transfer codes and move a pending
/// request to `processing`.
///
/// Returns `false` if the request was no longer pending.
pub fn mark_processing(
    conn: &Connection,
    id: i64,
    recipient_code: &str,
    transfer_code: &str,
    now: Timestamp,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE payout_requests
         SET status = 'processing', recipient_code = ?2, transfer_code = ?3, updated_at = ?4
         WHERE id = ?1 AND status = 'pending'",
        rusqlite::params![id, recipient_code, transfer_code, now as i64],
    )?;
    Ok(updated == 1)
}

/// Claim a pending, never-dispatched request for another provider attempt.
///
/// Succeeds only if the request was last touched at or before
/// `stale_before`, and stamps it with `now` so a concurrent claim loses.
pub fn claim_dispatch(
    conn: &Connection,
    id: i64,
    stale_before: Timestamp,
    now: Timestamp,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE payout_requests
         SET updated_at = ?3
         WHERE id = ?1 AND status = 'pending' AND transfer_code IS NULL
           AND updated_at <= ?2",
        rusqlite::params![id, stale_before as i64, now as i64],
    )?;
    Ok(updated == 1)
}

/// Move a non-terminal request to a terminal status.
///
/// Returns `false` if the request was already terminal.
pub fn finish(
    conn: &Connection,
    id: i64,
    status: PayoutStatus,
    failure_reason: Option<&str>,
    now: Timestamp,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE payout_requests
         SET status = ?2, failure_reason = COALESCE(?3, failure_reason), updated_at = ?4
         WHERE id = ?1 AND status IN ('pending', 'processing')",
        rusqlite::params![id, status.as_str(), failure_reason, now as i64],
    )?;
    Ok(updated == 1)
}

/// Total withdrawn or in flight for `user_id` since `since`, across both the
/// current and the legacy withdrawal tables. Returned requests are excluded.
pub fn total_since(conn: &Connection, user_id: &str, since: Timestamp) -> Result<i64> {
    let total = conn.query_row(
        "SELECT
            (SELECT COALESCE(SUM(amount), 0) FROM payout_requests
             WHERE user_id = ?1 AND created_at >= ?2 AND status NOT IN ('failed', 'refunded'))
          + (SELECT COALESCE(SUM(amount), 0) FROM withdrawals
             WHERE user_id = ?1 AND created_at >= ?2 AND status NOT IN ('failed', 'refunded', 'rejected'))",
        rusqlite::params![user_id, since as i64],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Insert a legacy withdrawal record.
pub fn insert_legacy(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    status: &str,
    created_at: Timestamp,
) -> Result<()> {
    conn.execute(
        "INSERT INTO withdrawals (user_id, amount, status, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![user_id, amount, status, created_at as i64],
    )?;
    Ok(())
}

/// Most recent requests for a user.
pub fn for_user(conn: &Connection, user_id: &str, limit: u32) -> Result<Vec<PayoutRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM payout_requests WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![user_id, limit], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::profiles::{self, NewProfile};

    fn test_db() -> Connection {
        let conn = crate::open_memory().expect("open test db");
        profiles::insert(&conn, &NewProfile::new("u1"), 0).expect("profile");
        conn
    }

    fn new_payout<'a>(key: &'a str, reference: &'a str, amount: i64) -> NewPayout<'a> {
        NewPayout {
            idempotency_key: key,
            user_id: "u1",
            amount,
            amount_minor: amount / 1000,
            currency: "NGN",
            account_name: "Ada Obi",
            bank_code: "058",
            account_masked: "******6789",
            account_encrypted: "sealed",
            reference,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let conn = test_db();
        let id = insert(&conn, &new_payout("k1", "wd_1", 5_000_000), 100).expect("insert");

        let by_id = find_by_id(&conn, id).expect("by id").expect("present");
        let by_key = find_by_key(&conn, "k1").expect("by key").expect("present");
        let by_ref = find_by_reference(&conn, "wd_1").expect("by ref").expect("present");
        assert_eq!(by_id, by_key);
        assert_eq!(by_key, by_ref);
        assert_eq!(by_id.status, PayoutStatus::Pending);
        assert_eq!(by_id.locked_amount, 5_000_000);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let conn = test_db();
        insert(&conn, &new_payout("k1", "wd_1", 5_000_000), 100).expect("insert");
        let err = insert(&conn, &new_payout("k1", "wd_2", 5_000_000), 101).expect_err("dup");
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_status_transitions_guarded() {
        let conn = test_db();
        let id = insert(&conn, &new_payout("k1", "wd_1", 5_000_000), 100).expect("insert");

        assert!(mark_processing(&conn, id, "RCP_1", "TRF_1", 101).expect("processing"));
        assert!(!mark_processing(&conn, id, "RCP_1", "TRF_1", 102).expect("again"));

        assert!(finish(&conn, id, PayoutStatus::Completed, None, 103).expect("complete"));
        assert!(!finish(&conn, id, PayoutStatus::Failed, Some("late"), 104).expect("terminal"));

        let row = find_by_id(&conn, id).expect("find").expect("present");
        assert_eq!(row.status, PayoutStatus::Completed);
        assert_eq!(row.transfer_code.as_deref(), Some("TRF_1"));
        assert!(row.failure_reason.is_none());
    }

    #[test]
    fn test_claim_dispatch_only_when_stale() {
        let conn = test_db();
        let id = insert(&conn, &new_payout("k1", "wd_1", 5_000_000), 100).expect("insert");

        assert!(!claim_dispatch(&conn, id, 99, 130).expect("fresh"));
        assert!(claim_dispatch(&conn, id, 100, 131).expect("stale"));
        assert!(!claim_dispatch(&conn, id, 130, 132).expect("just claimed"));

        mark_processing(&conn, id, "RCP_1", "TRF_1", 200).expect("processing");
        assert!(!claim_dispatch(&conn, id, 500, 501).expect("dispatched"));
    }

    #[test]
    fn test_total_since_spans_both_tables() {
        let conn = test_db();
        insert(&conn, &new_payout("k1", "wd_1", 5_000_000), 1000).expect("insert");
        let failed = insert(&conn, &new_payout("k2", "wd_2", 7_000_000), 1000).expect("insert");
        finish(&conn, failed, PayoutStatus::Failed, Some("bank down"), 1001).expect("fail");
        insert(&conn, &new_payout("k3", "wd_3", 9_000_000), 10).expect("old");

        insert_legacy(&conn, "u1", 2_000_000, "completed", 1000).expect("legacy");
        insert_legacy(&conn, "u1", 4_000_000, "rejected", 1000).expect("legacy rejected");

        assert_eq!(total_since(&conn, "u1", 500).expect("total"), 7_000_000);
    }

    #[test]
    fn test_for_user_newest_first() {
        let conn = test_db();
        insert(&conn, &new_payout("k1", "wd_1", 1_000_000), 100).expect("insert");
        insert(&conn, &new_payout("k2", "wd_2", 2_000_000), 200).expect("insert");
        let rows = for_user(&conn, "u1", 10).expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].idempotency_key, "k2");
    }
}
