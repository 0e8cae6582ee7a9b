//! Validation vote query functions.
//!
//! A validator votes on a clip at most once (`UNIQUE (clip_id, validator_id)`)
//! and votes are never updated.

use rusqlite::{Connection, Row};
use vox_types::{Timestamp, VoteId};

use crate::Result;

/// A vote row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteRow {
    pub id: VoteId,
    pub clip_id: String,
    pub validator_id: String,
    pub is_valid: bool,
    pub feedback: Option<String>,
    pub created_at: Timestamp,
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<VoteRow> {
    Ok(VoteRow {
        id: row.get(0)?,
        clip_id: row.get(1)?,
        validator_id: row.get(2)?,
        is_valid: row.get(3)?,
        feedback: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
    })
}

/// Insert a vote. A second vote by the same validator fails with a
/// unique-constraint error.
pub fn insert(
    conn: &Connection,
    clip_id: &str,
    validator_id: &str,
    is_valid: bool,
    feedback: Option<&str>,
    now: Timestamp,
) -> Result<VoteId> {
    conn.execute(
        "INSERT INTO validations (clip_id, validator_id, is_valid, feedback, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![clip_id, validator_id, is_valid, feedback, now as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Whether `validator_id` has already voted on `clip_id`.
pub fn exists(conn: &Connection, clip_id: &str, validator_id: &str) -> Result<bool> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM validations WHERE clip_id = ?1 AND validator_id = ?2)",
        [clip_id, validator_id],
        |row| row.get(0),
    )?;
    Ok(found == 1)
}

/// All votes on a clip, oldest first.
pub fn for_clip(conn: &Connection, clip_id: &str) -> Result<Vec<VoteRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, clip_id, validator_id, is_valid, feedback, created_at
         FROM validations WHERE clip_id = ?1 ORDER BY id",
    )?;

    let rows = stmt
        .query_map([clip_id], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
