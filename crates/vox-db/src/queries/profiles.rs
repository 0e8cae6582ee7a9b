//! Profile query functions.
//!
//! Balance columns are deliberately absent from every writer here: they are
//! mutated only by the ledger. Trust score writes are used only by consensus
//! settlement.

use rusqlite::{Connection, OptionalExtension, Row};
use vox_types::{day_number, day_start, Role, Timestamp, DEFAULT_TRUST_SCORE};

use crate::{parse_tag, DbError, Result};

/// A profile row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileRow {
    pub user_id: String,
    /// Available balance in micros.
    pub balance: i64,
    /// Locked balance (withdrawals in flight) in micros.
    pub pending_balance: i64,
    pub lifetime_earned: i64,
    pub trust_score: i64,
    pub role: Role,
    pub referred_by: Option<String>,
    pub referral_earnings: i64,
    pub languages: Vec<String>,
    pub daily_validations: i64,
    pub total_validations: i64,
    pub active_days: i64,
    pub last_daily_reset: Timestamp,
    pub last_active_day: Option<u64>,
    pub created_at: Timestamp,
}

/// Fields for onboarding a profile.
#[derive(Clone, Debug)]
pub struct NewProfile {
    pub user_id: String,
    pub role: Role,
    pub referred_by: Option<String>,
    pub languages: Vec<String>,
    pub trust_score: i64,
}

impl NewProfile {
    /// A plain user with default trust and no declared languages.
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            role: Role::User,
            referred_by: None,
            languages: Vec::new(),
            trust_score: DEFAULT_TRUST_SCORE,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn referred_by(mut self, referrer: &str) -> Self {
        self.referred_by = Some(referrer.to_string());
        self
    }

    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_trust(mut self, trust_score: i64) -> Self {
        self.trust_score = trust_score;
        self
    }
}

/// Validator progression counters after a recorded validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progression {
    pub daily_validations: i64,
    pub total_validations: i64,
    pub active_days: i64,
}

const COLUMNS: &str = "user_id, balance, pending_balance, lifetime_earned, trust_score, role, \
     referred_by, referral_earnings, languages, daily_validations, total_validations, \
     active_days, last_daily_reset, last_active_day, created_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
    let languages: String = row.get(8)?;
    let languages: Vec<String> = serde_json::from_str(&languages).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ProfileRow {
        user_id: row.get(0)?,
        balance: row.get(1)?,
        pending_balance: row.get(2)?,
        lifetime_earned: row.get(3)?,
        trust_score: row.get(4)?,
        role: parse_tag(5, row.get(5)?)?,
        referred_by: row.get(6)?,
        referral_earnings: row.get(7)?,
        languages,
        daily_validations: row.get(9)?,
        total_validations: row.get(10)?,
        active_days: row.get(11)?,
        last_daily_reset: row.get::<_, i64>(12)? as u64,
        last_active_day: row.get::<_, Option<i64>>(13)?.map(|d| d as u64),
        created_at: row.get::<_, i64>(14)? as u64,
    })
}

/// Insert a new profile with zero balances.
pub fn insert(conn: &Connection, profile: &NewProfile, now: Timestamp) -> Result<()> {
    let languages = serde_json::to_string(&profile.languages)?;
    conn.execute(
        "INSERT INTO profiles (user_id, role, referred_by, languages, trust_score, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            profile.user_id,
            profile.role.as_str(),
            profile.referred_by,
            languages,
            profile.trust_score,
            now as i64,
        ],
    )?;
    Ok(())
}

/// Look up a profile by user id.
pub fn find(conn: &Connection, user_id: &str) -> Result<Option<ProfileRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM profiles WHERE user_id = ?1"),
            [user_id],
            map_row,
        )
        .optional()?;
    Ok(row)
}

/// Look up a profile, failing with [`DbError::NotFound`] if absent.
pub fn get(conn: &Connection, user_id: &str) -> Result<ProfileRow> {
    find(conn, user_id)?.ok_or_else(|| DbError::NotFound(format!("profile '{user_id}'")))
}

/// Shift a trust score by `delta`, clamped to `[floor, ceiling]`.
///
/// Returns the new score.
pub fn adjust_trust(
    conn: &Connection,
    user_id: &str,
    delta: i64,
    floor: i64,
    ceiling: i64,
) -> Result<i64> {
    let updated = conn.execute(
        "UPDATE profiles SET trust_score = MAX(?2, MIN(?3, trust_score + ?4)) WHERE user_id = ?1",
        rusqlite::params![user_id, floor, ceiling, delta],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("profile '{user_id}'")));
    }
    let score = conn.query_row(
        "SELECT trust_score FROM profiles WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(score)
}

/// Count one validation towards the daily, lifetime and active-day counters.
///
/// The daily counter restarts when the last reset predates the start of the
/// current UTC day; the active-day counter moves at most once per day.
pub fn record_validation(conn: &Connection, user_id: &str, now: Timestamp) -> Result<Progression> {
    let today_start = day_start(now) as i64;
    let today = day_number(now) as i64;

    let updated = conn.execute(
        "UPDATE profiles SET
            daily_validations = CASE WHEN last_daily_reset < ?2 THEN 1 ELSE daily_validations + 1 END,
            last_daily_reset = CASE WHEN last_daily_reset < ?2 THEN ?3 ELSE last_daily_reset END,
            total_validations = total_validations + 1,
            active_days = CASE
                WHEN last_active_day IS NULL OR last_active_day < ?4 THEN active_days + 1
                ELSE active_days
            END,
            last_active_day = ?4
         WHERE user_id = ?1",
        rusqlite::params![user_id, today_start, now as i64, today],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("profile '{user_id}'")));
    }

    let progression = conn.query_row(
        "SELECT daily_validations, total_validations, active_days FROM profiles WHERE user_id = ?1",
        [user_id],
        |row| {
            Ok(Progression {
                daily_validations: row.get(0)?,
                total_validations: row.get(1)?,
                active_days: row.get(2)?,
            })
        },
    )?;
    Ok(progression)
}

/// Add to a referrer's aggregate referral earnings counter.
pub fn add_referral_earnings(conn: &Connection, user_id: &str, amount: i64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE profiles SET referral_earnings = referral_earnings + ?2 WHERE user_id = ?1",
        rusqlite::params![user_id, amount],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("profile '{user_id}'")));
    }
    Ok(())
}
