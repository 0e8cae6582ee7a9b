//! Periodic housekeeping.
//!
//! Expired cooldown entries are dropped once a minute so the tracker does
//! not grow with every validator ever seen.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;
use vox_consensus::CooldownTracker;

/// Interval between cooldown sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Prune `cooldown` every `interval` until a shutdown signal arrives.
pub async fn run(
    cooldown: Arc<CooldownTracker>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = cooldown.prune(vox_types::now_secs());
                if removed > 0 {
                    debug!(removed, remaining = cooldown.len(), "cooldown entries pruned");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
