//! vox-daemon: the consensus-and-settlement daemon.
//!
//! Single OS process running a Tokio async runtime. The application front
//! end talks to the daemon via newline-delimited JSON-RPC over a Unix
//! socket; the transfer provider's webhooks are relayed through the same
//! socket.

mod commands;
mod config;
mod rpc;
mod sweeper;

use std::sync::Arc;

use anyhow::Context;
use rusqlite::Connection;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};
use vox_consensus::{ConsensusEngine, CooldownTracker, ValidationService};
use vox_crypto::cipher::AccountCipher;
use vox_ledger::{PayoutEngine, RateCache};
use vox_payments::{FixedRateExchange, HttpTransferProvider, WithdrawalService};

use crate::config::DaemonConfig;
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Database connection.
    pub db: Arc<Mutex<Connection>>,
    /// Configuration.
    pub config: DaemonConfig,
    /// Reward rate table cache shared by every payout.
    pub rates: Arc<RateCache>,
    /// Vote intake and consensus.
    pub validation: ValidationService,
    /// `None` when provider credentials or the encryption key are missing.
    pub withdrawals: Option<WithdrawalService>,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl DaemonState {
    /// Wire the engines around an open database.
    pub fn new(db: Arc<Mutex<Connection>>, config: DaemonConfig) -> anyhow::Result<Self> {
        let rates = Arc::new(RateCache::new(config.rewards.rate_ttl()));
        let payouts = Arc::new(PayoutEngine::new(
            rates.clone(),
            config.rewards.payout.clone(),
        ));
        let consensus = Arc::new(ConsensusEngine::new(
            config.consensus.clone(),
            payouts,
            config.royalty_split()?,
        ));
        let cooldown = Arc::new(CooldownTracker::new(config.validation.cooldown_secs));
        let validation = ValidationService::new(config.validation.clone(), cooldown, consensus);

        let withdrawals = if config.withdrawals_enabled() {
            Some(build_withdrawals(db.clone(), &config)?)
        } else {
            warn!("transfer provider secret or encryption key missing, withdrawals disabled");
            None
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            db,
            config,
            rates,
            validation,
            withdrawals,
            shutdown_tx,
        })
    }
}

fn build_withdrawals(
    db: Arc<Mutex<Connection>>,
    config: &DaemonConfig,
) -> anyhow::Result<WithdrawalService> {
    let cipher = AccountCipher::from_hex(&config.encryption.key)
        .context("encryption.key must be 32 bytes of hex")?;
    let provider = HttpTransferProvider::new(
        config.provider.base_url.clone(),
        config.provider.secret_key.clone(),
        config.withdrawals.currency.clone(),
        std::time::Duration::from_secs(config.withdrawals.provider_timeout_secs),
    )?;
    Ok(WithdrawalService::new(
        db,
        Arc::new(provider),
        Arc::new(FixedRateExchange::new(config.provider.minor_per_usd)),
        cipher,
        config.provider.secret_key.clone(),
        config.withdrawals.clone(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(config.logging.level.parse()?)
                .from_env_lossy(),
        )
        .init();

    info!("vox daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let db_path = config.db_path();
    let conn = vox_db::open(&db_path)?;
    info!(path = %db_path.display(), "database opened");

    let db = Arc::new(Mutex::new(conn));
    let state = Arc::new(DaemonState::new(db, config)?);

    // 3. Warm the rate cache so an empty rate table shows up at startup
    match state.rates.refresh(&*state.db.lock().await) {
        Ok(0) => error!("reward rate table has no active rows"),
        Ok(count) => info!(count, "reward rates loaded"),
        Err(e) => error!(error = %e, "failed to read reward rates"),
    }

    // 4. Background cooldown sweeper
    let sweeper = tokio::spawn(sweeper::run(
        state.validation.cooldown().clone(),
        sweeper::SWEEP_INTERVAL,
        state.shutdown_tx.subscribe(),
    ));

    // 5. Start IPC server
    let socket_path = data_dir.join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!(socket = %socket_path.display(), "vox daemon ready");

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
        }
    }

    let _ = state.shutdown_tx.send(());
    let _ = sweeper.await;
    let _ = std::fs::remove_file(&socket_path);

    info!("vox daemon stopped");
    Ok(())
}
