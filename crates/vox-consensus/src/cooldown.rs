//! Per-validator submission cooldown.
//!
//! Best-effort abuse deterrent held in memory. Losing it on restart is
//! acceptable; it is never consulted for correctness.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use vox_types::Timestamp;

/// Default interval between accepted submissions, in seconds.
pub const DEFAULT_COOLDOWN_SECS: u64 = 5;

/// Last accepted submission time per validator.
#[derive(Debug)]
pub struct CooldownTracker {
    interval_secs: u64,
    last_seen: Mutex<HashMap<String, Timestamp>>,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_SECS)
    }
}

impl CooldownTracker {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    /// Admit `user_id` at `now`, or return the seconds left to wait.
    ///
    /// An admitted call records `now` as the user's last submission.
    pub fn try_acquire(&self, user_id: &str, now: Timestamp) -> Result<(), u64> {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(&last) = last_seen.get(user_id) {
            let elapsed = now.saturating_sub(last);
            if elapsed < self.interval_secs {
                return Err(self.interval_secs - elapsed);
            }
        }
        last_seen.insert(user_id.to_string(), now);
        Ok(())
    }

    /// Drop entries whose cooldown has already elapsed. Returns how many were removed.
    pub fn prune(&self, now: Timestamp) -> usize {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        let before = last_seen.len();
        last_seen.retain(|_, last| now.saturating_sub(*last) < self.interval_secs);
        before - last_seen.len()
    }

    pub fn len(&self) -> usize {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
