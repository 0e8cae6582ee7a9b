//! # vox-db
//!
//! Relational storage for the consensus-and-settlement engine.
//!
//! ## Conventions
//!
//! - WAL mode, foreign keys enforced, 5 s busy timeout
//! - All timestamps are Unix epoch seconds
//! - All amounts are integer micros of the unit of account
//! - Schema version stored in `PRAGMA user_version`
//! - Multi-row writes go through a [`UnitOfWork`]

pub mod migrations;
pub mod queries;
pub mod schema;
pub mod uow;

use std::path::Path;
use std::str::FromStr;

use rusqlite::Connection;
use vox_types::ParseTagError;

pub use uow::{transact, UnitOfWork};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Busy timeout applied to every connection, in milliseconds.
pub const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    /// Whether this error is a UNIQUE / PRIMARY KEY violation.
    ///
    /// Callers use this to treat a racing duplicate insert as "already exists".
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Constraint(_) => true,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
                    && matches!(
                        err.extended_code,
                        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                            | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    )
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;"
    ))?;
    Ok(())
}

/// Parse a stored text tag inside a row-mapping closure.
pub(crate) fn parse_tag<T>(idx: usize, value: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseTagError>,
{
    value.parse().map_err(|e: ParseTagError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_wal_mode() {
        let conn = open_memory().expect("open");
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("get journal_mode");
        // In-memory databases use "memory" mode, not WAL
        assert!(mode == "wal" || mode == "memory");
    }

    #[test]
    fn test_file_database_uses_wal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open(&dir.path().join("vox.db")).expect("open");
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("get journal_mode");
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = open_memory().expect("open");
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("get foreign_keys");
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_unique_violation_detected() {
        let conn = open_memory().expect("open");
        conn.execute(
            "INSERT INTO profiles (user_id, created_at) VALUES ('u1', 0)",
            [],
        )
        .expect("first insert");
        let err = conn
            .execute(
                "INSERT INTO profiles (user_id, created_at) VALUES ('u1', 0)",
                [],
            )
            .map_err(DbError::from)
            .expect_err("duplicate insert");
        assert!(err.is_unique_violation());
        assert!(!DbError::NotFound("x".into()).is_unique_violation());
    }
}
