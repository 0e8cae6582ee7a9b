//! Reward rate table query functions.
//!
//! Rates are versioned: setting a new rate deactivates the previous active
//! row and inserts a new one, so the history of amounts is kept.

use rusqlite::Connection;
use vox_types::Timestamp;

use crate::Result;

/// A reward rate row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateRow {
    pub id: i64,
    pub action_type: String,
    pub amount: i64,
    pub is_active: bool,
    pub created_at: Timestamp,
}

/// All active `(action_type, amount)` pairs.
pub fn active(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt =
        conn.prepare("SELECT action_type, amount FROM reward_rates WHERE is_active = 1")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Replace the active rate for `action_type`.
pub fn set_active(conn: &Connection, action_type: &str, amount: i64, now: Timestamp) -> Result<()> {
    conn.execute(
        "UPDATE reward_rates SET is_active = 0 WHERE action_type = ?1 AND is_active = 1",
        [action_type],
    )?;
    conn.execute(
        "INSERT INTO reward_rates (action_type, amount, is_active, created_at)
         VALUES (?1, ?2, 1, ?3)",
        rusqlite::params![action_type, amount, now as i64],
    )?;
    Ok(())
}

/// Deactivate the rate for `action_type` without replacing it.
pub fn deactivate(conn: &Connection, action_type: &str) -> Result<()> {
    conn.execute(
        "UPDATE reward_rates SET is_active = 0 WHERE action_type = ?1 AND is_active = 1",
        [action_type],
    )?;
    Ok(())
}

/// Every version of the rate for `action_type`, newest first.
pub fn history(conn: &Connection, action_type: &str) -> Result<Vec<RateRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, action_type, amount, is_active, created_at
         FROM reward_rates WHERE action_type = ?1 ORDER BY id DESC",
    )?;
    let rows = stmt
        .query_map([action_type], |row| {
            Ok(RateRow {
                id: row.get(0)?,
                action_type: row.get(1)?,
                amount: row.get(2)?,
                is_active: row.get(3)?,
                created_at: row.get::<_, i64>(4)? as u64,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
