//! Reward rate cache.
//!
//! Rates live in the `reward_rates` table. Reads go through an in-process
//! snapshot that is reloaded once it is older than the TTL, and reloaded
//! immediately on a miss. A miss that survives the reload is a configuration
//! error: no default amount is ever substituted.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use rusqlite::Connection;
use vox_db::queries::rates;
use vox_types::{RewardAction, Timestamp};

use crate::{LedgerError, Result};

/// Default snapshot lifetime.
pub const DEFAULT_RATE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Snapshot {
    rates: HashMap<String, i64>,
    loaded_at: Option<Instant>,
}

/// Shared, lock-protected view of the active reward rates.
#[derive(Debug)]
pub struct RateCache {
    ttl: Duration,
    snapshot: RwLock<Snapshot>,
}

impl Default for RateCache {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_TTL)
    }
}

impl RateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    /// Amount in micros currently paid for `action`.
    pub fn amount(&self, conn: &Connection, action: RewardAction) -> Result<i64> {
        if self.is_stale() {
            self.refresh(conn)?;
        }
        if let Some(amount) = self.cached(action) {
            return Ok(amount);
        }

        tracing::warn!(action = %action, "reward rate cache miss, reloading");
        self.refresh(conn)?;
        self.cached(action).ok_or_else(|| {
            tracing::error!(action = %action, "no active reward rate configured");
            LedgerError::MissingRate(action.as_str().to_string())
        })
    }

    /// Reload every active rate. Returns the number of rates loaded.
    pub fn refresh(&self, conn: &Connection) -> Result<usize> {
        let loaded: HashMap<String, i64> = rates::active(conn)?.into_iter().collect();
        let count = loaded.len();

        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        snapshot.rates = loaded;
        snapshot.loaded_at = Some(Instant::now());
        drop(snapshot);

        tracing::debug!(count, "reward rates reloaded");
        Ok(count)
    }

    /// Persist a new amount for `action` and drop the snapshot.
    pub fn set_rate(
        &self,
        conn: &Connection,
        action: RewardAction,
        amount: i64,
        now: Timestamp,
    ) -> Result<()> {
        if amount < 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        rates::set_active(conn, action.as_str(), amount, now)?;
        self.invalidate();
        tracing::info!(action = %action, amount, "reward rate updated");
        Ok(())
    }

    /// Force the next read to reload from storage.
    pub fn invalidate(&self) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        snapshot.loaded_at = None;
    }

    fn cached(&self, action: RewardAction) -> Option<i64> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        snapshot.rates.get(action.as_str()).copied()
    }

    fn is_stale(&self) -> bool {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        match snapshot.loaded_at {
            Some(at) => at.elapsed() >= self.ttl,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_amounts() {
        let conn = vox_db::open_memory().expect("open");
        let cache = RateCache::default();
        assert_eq!(
            cache.amount(&conn, RewardAction::ClipApproved).expect("rate"),
            100_000
        );
        assert_eq!(
            cache.amount(&conn, RewardAction::CorrectValidation).expect("rate"),
            20_000
        );
    }

    #[test]
    fn test_fresh_snapshot_is_served_until_refresh() {
        let conn = vox_db::open_memory().expect("open");
        let cache = RateCache::new(Duration::from_secs(3600));
        cache.amount(&conn, RewardAction::ClipApproved).expect("warm");

        rates::set_active(&conn, "clip_approved", 250_000, 10).expect("set");
        assert_eq!(
            cache.amount(&conn, RewardAction::ClipApproved).expect("rate"),
            100_000
        );

        cache.refresh(&conn).expect("refresh");
        assert_eq!(
            cache.amount(&conn, RewardAction::ClipApproved).expect("rate"),
            250_000
        );
    }

    #[test]
    fn test_expired_snapshot_reloads() {
        let conn = vox_db::open_memory().expect("open");
        let cache = RateCache::new(Duration::ZERO);
        cache.amount(&conn, RewardAction::ClipApproved).expect("warm");
        rates::set_active(&conn, "clip_approved", 1, 10).expect("set");
        assert_eq!(cache.amount(&conn, RewardAction::ClipApproved).expect("rate"), 1);
    }

    #[test]
    fn test_set_rate_invalidates() {
        let conn = vox_db::open_memory().expect("open");
        let cache = RateCache::new(Duration::from_secs(3600));
        cache.amount(&conn, RewardAction::CorrectValidation).expect("warm");
        cache
            .set_rate(&conn, RewardAction::CorrectValidation, 30_000, 10)
            .expect("set");
        assert_eq!(
            cache.amount(&conn, RewardAction::CorrectValidation).expect("rate"),
            30_000
        );
    }

    #[test]
    fn test_missing_rate_is_an_error() {
        let conn = vox_db::open_memory().expect("open");
        rates::deactivate(&conn, "correct_validation").expect("deactivate");
        let cache = RateCache::default();
        let err = cache
            .amount(&conn, RewardAction::CorrectValidation)
            .expect_err("missing");
        assert!(matches!(err, LedgerError::MissingRate(ref a) if a == "correct_validation"));
        assert_eq!(err.code(), "missing_reward_rate");
    }
}
