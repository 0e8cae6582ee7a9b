//! Shared fixtures for the vox integration tests.
//!
//! The tests exercise end-to-end flows across the engine crates against a
//! file-backed database, so several connections (one per simulated request
//! handler) can race on the same rows the way they do in production.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;
use tempfile::TempDir;
use vox_consensus::{
    ConsensusConfig, ConsensusEngine, CooldownTracker, ValidationConfig, ValidationService,
};
use vox_crypto::cipher::AccountCipher;
use vox_db::queries::clips::{self, NewClip};
use vox_db::queries::profiles::{self, NewProfile};
use vox_db::transact;
use vox_ledger::{ledger, LedgerError, PayoutConfig, PayoutEngine, RateCache, RoyaltySplit};
use vox_payments::provider::TransferReceipt;
use vox_payments::{ProviderError, TransferProvider};
use vox_types::{Timestamp, TransactionKind};

/// Simulated timestamp for deterministic testing.
pub const TEST_TIMESTAMP: Timestamp = 1_700_000_000;

/// Webhook signing secret shared by the fake provider and the service.
pub const PROVIDER_SECRET: &str = "sk_test_integration";

/// A database file in a temporary directory.
pub struct TestDb {
    _dir: TempDir,
    path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vox.db");
        vox_db::open(&path).expect("create database");
        Self { _dir: dir, path }
    }

    /// Open a fresh connection to the shared file.
    pub fn connect(&self) -> Connection {
        vox_db::open(&self.path).expect("open connection")
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

pub fn add_profile(conn: &Connection, user_id: &str) {
    profiles::insert(conn, &NewProfile::new(user_id), 0).expect("insert profile");
}

pub fn add_clip(conn: &Connection, id: &str, owner_id: &str, parent_clip_id: Option<&str>) {
    clips::insert(
        conn,
        &NewClip {
            id,
            owner_id,
            language: "en",
            parent_clip_id,
        },
        0,
    )
    .expect("insert clip");
}

/// Give `user_id` spendable funds.
pub fn top_up(conn: &mut Connection, user_id: &str, amount: i64) {
    transact(conn, |uow| -> Result<i64, LedgerError> {
        ledger::credit(
            uow,
            user_id,
            amount,
            TransactionKind::TopUp,
            "test top-up",
            None,
            0,
        )
    })
    .expect("top up");
}

/// Validation intake with default tuning and no cooldown.
pub fn validation_service() -> ValidationService {
    let payouts = PayoutEngine::new(Arc::new(RateCache::default()), PayoutConfig::default());
    let consensus = ConsensusEngine::new(
        ConsensusConfig::default(),
        Arc::new(payouts),
        RoyaltySplit::default(),
    );
    ValidationService::new(
        ValidationConfig {
            cooldown_secs: 0,
            ..ValidationConfig::default()
        },
        Arc::new(CooldownTracker::new(0)),
        Arc::new(consensus),
    )
}

pub fn test_cipher() -> AccountCipher {
    AccountCipher::new([0x5Au8; vox_crypto::cipher::KEY_SIZE])
}

/// Transfer provider that accepts every transfer without network I/O.
#[derive(Debug, Default)]
pub struct AcceptingProvider;

#[async_trait]
impl TransferProvider for AcceptingProvider {
    async fn create_recipient(
        &self,
        _account_number: &str,
        _bank_code: &str,
        _name: &str,
    ) -> Result<String, ProviderError> {
        Ok("RCP_integration".to_string())
    }

    async fn initiate_transfer(
        &self,
        _recipient_code: &str,
        _amount_minor: i64,
        reference: &str,
        _reason: &str,
    ) -> Result<TransferReceipt, ProviderError> {
        Ok(TransferReceipt {
            transfer_code: format!("TRF_{reference}"),
            status: "pending".to_string(),
        })
    }
}

/// Signed webhook body for a transfer outcome.
pub fn signed_event(event: &str, reference: &str) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&serde_json::json!({
        "event": event,
        "data": {
            "reference": reference,
            "transfer_code": format!("TRF_{reference}"),
            "reason": "integration test",
        },
    }))
    .expect("serialize event");
    let signature =
        vox_crypto::hmac::sign_sha512(PROVIDER_SECRET.as_bytes(), &body).expect("sign event");
    (body, signature)
}
