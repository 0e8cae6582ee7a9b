//! Database migration system.
//!
//! Schema version stored in `PRAGMA user_version`. Migrations are forward-only.

use rusqlite::Connection;
use vox_types::RewardAction;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Reward amounts seeded into a fresh database, in micros.
pub const DEFAULT_RATES: [(RewardAction, i64); 2] = [
    (RewardAction::ClipApproved, 100_000),
    (RewardAction::CorrectValidation, 20_000),
];

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let current_version: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(DbError::Sqlite)?;

    if current_version == 0 {
        tracing::info!("Initializing database schema v{SCHEMA_VERSION}");
        conn.execute_batch(schema::SCHEMA_V1)
            .map_err(DbError::Sqlite)?;

        insert_default_rates(conn)?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(DbError::Sqlite)?;
    } else if current_version < SCHEMA_VERSION {
        for version in (current_version + 1)..=SCHEMA_VERSION {
            tracing::info!("Running migration to v{version}");
            run_migration(conn, version)?;
            conn.pragma_update(None, "user_version", version)
                .map_err(DbError::Sqlite)?;
        }
    } else if current_version > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "Database version {current_version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    Ok(())
}

/// Seed the active reward rates.
fn insert_default_rates(conn: &Connection) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO reward_rates (action_type, amount, is_active, created_at)
             SELECT ?1, ?2, 1, 0
             WHERE NOT EXISTS (
                 SELECT 1 FROM reward_rates WHERE action_type = ?1 AND is_active = 1
             )",
        )
        .map_err(DbError::Sqlite)?;

    for (action, amount) in &DEFAULT_RATES {
        stmt.execute(rusqlite::params![action.as_str(), amount])
            .map_err(DbError::Sqlite)?;
    }

    Ok(())
}

/// Run a specific migration.
fn run_migration(_conn: &Connection, version: u32) -> Result<()> {
    Err(DbError::Migration(format!(
        "Unknown migration version: {version}"
    )))
}
