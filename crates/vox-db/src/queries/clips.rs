//! Clip query functions.

use rusqlite::{Connection, OptionalExtension, Row};
use vox_types::{ClipStatus, Timestamp};

use crate::{parse_tag, Result};

/// A clip row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClipRow {
    pub id: String,
    pub owner_id: String,
    pub language: String,
    pub status: ClipStatus,
    pub parent_clip_id: Option<String>,
    pub vote_count: i64,
    pub created_at: Timestamp,
    pub settled_at: Option<Timestamp>,
}

/// Fields needed to register a new clip.
#[derive(Clone, Debug)]
pub struct NewClip<'a> {
    pub id: &'a str,
    pub owner_id: &'a str,
    pub language: &'a str,
    pub parent_clip_id: Option<&'a str>,
}

const COLUMNS: &str =
    "id, owner_id, language, status, parent_clip_id, vote_count, created_at, settled_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<ClipRow> {
    Ok(ClipRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        language: row.get(2)?,
        status: parse_tag(3, row.get(3)?)?,
        parent_clip_id: row.get(4)?,
        vote_count: row.get(5)?,
        created_at: row.get::<_, i64>(6)? as u64,
        settled_at: row.get::<_, Option<i64>>(7)?.map(|t| t as u64),
    })
}

/// Insert a pending clip.
pub fn insert(conn: &Connection, clip: &NewClip<'_>, now: Timestamp) -> Result<()> {
    conn.execute(
        "INSERT INTO clips (id, owner_id, language, parent_clip_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            clip.id,
            clip.owner_id,
            clip.language,
            clip.parent_clip_id,
            now as i64,
        ],
    )?;
    Ok(())
}

/// Look up a clip by id.
pub fn find(conn: &Connection, id: &str) -> Result<Option<ClipRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM clips WHERE id = ?1"),
            [id],
            map_row,
        )
        .optional()?;
    Ok(row)
}

/// Increment the denormalized vote counter.
pub fn increment_vote_count(conn: &Connection, id: &str) -> Result<i64> {
    conn.execute(
        "UPDATE clips SET vote_count = vote_count + 1 WHERE id = ?1",
        [id],
    )?;
    let count = conn.query_row("SELECT vote_count FROM clips WHERE id = ?1", [id], |row| {
        row.get(0)
    })?;
    Ok(count)
}

/// Move a pending clip to a terminal status.
///
/// Returns `false` if the clip was no longer pending.
pub fn settle(conn: &Connection, id: &str, status: ClipStatus, now: Timestamp) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE clips SET status = ?1, settled_at = ?2 WHERE id = ?3 AND status = 'pending'",
        rusqlite::params![status.as_str(), now as i64, id],
    )?;
    Ok(updated == 1)
}
