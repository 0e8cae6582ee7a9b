//! Notification outbox query functions.
//!
//! Engines only [`enqueue`] inside their unit of work. The external delivery
//! worker drains with [`pending`] and acknowledges with [`mark_delivered`] or
//! [`mark_failed`]. Delivery is at-least-once.

use rusqlite::{Connection, Row};
use vox_types::{OutboxKind, OutboxStatus, Timestamp};

use crate::{parse_tag, Result};

/// An outbox row.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxRow {
    pub id: i64,
    pub user_id: String,
    pub kind: OutboxKind,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub created_at: Timestamp,
    pub delivered_at: Option<Timestamp>,
}

const COLUMNS: &str = "id, user_id, kind, payload, status, attempts, created_at, delivered_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<OutboxRow> {
    let payload: String = row.get(3)?;
    let payload = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(OutboxRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: parse_tag(2, row.get(2)?)?,
        payload,
        status: parse_tag(4, row.get(4)?)?,
        attempts: row.get(5)?,
        created_at: row.get::<_, i64>(6)? as u64,
        delivered_at: row.get::<_, Option<i64>>(7)?.map(|t| t as u64),
    })
}

/// Write a pending notification row.
pub fn enqueue(
    conn: &Connection,
    user_id: &str,
    kind: OutboxKind,
    payload: &serde_json::Value,
    now: Timestamp,
) -> Result<i64> {
    let payload = serde_json::to_string(payload)?;
    conn.execute(
        "INSERT INTO notification_outbox (user_id, kind, payload, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![user_id, kind.as_str(), payload, now as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Oldest pending rows, up to `limit`.
pub fn pending(conn: &Connection, limit: u32) -> Result<Vec<OutboxRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM notification_outbox WHERE status = 'pending' ORDER BY id LIMIT ?1"
    ))?;
    let rows = stmt
        .query_map([limit], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All rows addressed to a user, oldest first.
pub fn for_user(conn: &Connection, user_id: &str) -> Result<Vec<OutboxRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM notification_outbox WHERE user_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([user_id], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Acknowledge delivery. Returns `false` if the row was not pending.
pub fn mark_delivered(conn: &Connection, id: i64, now: Timestamp) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE notification_outbox SET status = 'delivered', delivered_at = ?2
         WHERE id = ?1 AND status = 'pending'",
        rusqlite::params![id, now as i64],
    )?;
    Ok(updated == 1)
}

/// Record a failed delivery attempt. The row stays pending until it has
/// failed `max_attempts` times.
pub fn mark_failed(conn: &Connection, id: i64, max_attempts: u32) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE notification_outbox
         SET attempts = attempts + 1,
             status = CASE WHEN attempts + 1 >= ?2 THEN 'failed' ELSE 'pending' END
         WHERE id = ?1 AND status = 'pending'",
        rusqlite::params![id, max_attempts],
    )?;
    Ok(updated == 1)
}
