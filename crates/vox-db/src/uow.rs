//! Unit of work: the single transaction handle passed down to every
//! multi-row write.
//!
//! A unit of work is always an `IMMEDIATE` SQLite transaction. The write lock
//! is taken at `BEGIN`, so every row read inside it is effectively read
//! "for update" and two units of work touching the same rows serialize.
//! Dropping a unit of work without calling [`UnitOfWork::commit`] rolls it back.

use std::ops::Deref;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::{DbError, Result};

/// An open storage transaction.
pub struct UnitOfWork<'c> {
    tx: Transaction<'c>,
}

impl<'c> UnitOfWork<'c> {
    /// Begin a new unit of work on `conn`.
    pub fn begin(conn: &'c mut Connection) -> Result<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self { tx })
    }

    /// Commit every write made through this unit of work.
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Run `f` inside a named savepoint.
    ///
    /// On `Err` only the writes made inside the savepoint are undone; the
    /// enclosing unit of work stays usable and the error is returned.
    pub fn savepoint<T, E, F>(&self, name: &'static str, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Self) -> std::result::Result<T, E>,
        E: From<DbError>,
    {
        self.tx
            .execute_batch(&format!("SAVEPOINT {name}"))
            .map_err(DbError::from)?;

        match f(self) {
            Ok(value) => {
                self.tx
                    .execute_batch(&format!("RELEASE {name}"))
                    .map_err(DbError::from)?;
                Ok(value)
            }
            Err(err) => {
                self.tx
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))
                    .map_err(DbError::from)?;
                Err(err)
            }
        }
    }
}

impl Deref for UnitOfWork<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

/// Run `f` in a fresh unit of work, committing on `Ok` and rolling back on `Err`.
pub fn transact<T, E, F>(conn: &mut Connection, f: F) -> std::result::Result<T, E>
where
    F: FnOnce(&UnitOfWork<'_>) -> std::result::Result<T, E>,
    E: From<DbError>,
{
    let uow = UnitOfWork::begin(conn)?;
    let value = f(&uow)?;
    uow.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_profiles(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))
            .expect("count")
    }

    fn insert_profile(conn: &Connection, id: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO profiles (user_id, created_at) VALUES (?1, 0)",
            [id],
        )?;
        Ok(())
    }

    #[test]
    fn test_commit_persists() {
        let mut conn = crate::open_memory().expect("open");
        transact(&mut conn, |uow| insert_profile(uow, "a")).expect("transact");
        assert_eq!(count_profiles(&conn), 1);
    }

    #[test]
    fn test_error_rolls_back() {
        let mut conn = crate::open_memory().expect("open");
        let result: Result<()> = transact(&mut conn, |uow| {
            insert_profile(uow, "a")?;
            Err(DbError::NotFound("forced".into()))
        });
        assert!(result.is_err());
        assert_eq!(count_profiles(&conn), 0);
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let mut conn = crate::open_memory().expect("open");
        {
            let uow = UnitOfWork::begin(&mut conn).expect("begin");
            insert_profile(&uow, "a").expect("insert");
        }
        assert_eq!(count_profiles(&conn), 0);
    }

    #[test]
    fn test_failed_savepoint_keeps_outer_writes() {
        let mut conn = crate::open_memory().expect("open");
        transact(&mut conn, |uow| {
            insert_profile(uow, "outer")?;
            let inner: Result<()> = uow.savepoint("inner", |sp| {
                insert_profile(sp, "inner")?;
                Err(DbError::NotFound("forced".into()))
            });
            assert!(inner.is_err());
            Ok::<_, DbError>(())
        })
        .expect("transact");

        assert_eq!(count_profiles(&conn), 1);
        let id: String = conn
            .query_row("SELECT user_id FROM profiles", [], |row| row.get(0))
            .expect("select");
        assert_eq!(id, "outer");
    }

    #[test]
    fn test_successful_savepoint_is_released() {
        let mut conn = crate::open_memory().expect("open");
        transact(&mut conn, |uow| {
            uow.savepoint("inner", |sp| insert_profile(sp, "inner"))?;
            insert_profile(uow, "outer")
        })
        .expect("transact");
        assert_eq!(count_profiles(&conn), 2);
    }
}
