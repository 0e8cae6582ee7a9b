//! Withdrawal orchestration.
//!
//! The lock phase runs in a database transaction. The provider round trip
//! happens afterwards with the connection released and is bounded by
//! `provider_timeout_secs`.
//!
//! Funds are refunded on the spot only when no money can have moved: the
//! recipient step failed, or the provider refused the transfer outright.
//! A timeout or an unreadable answer from the transfer step leaves the
//! request `pending` with its funds locked; the provider's webhook settles
//! it, or [`WithdrawalService::resume`] re-sends it under the same
//! reference once the original attempt has expired.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::Mutex;
use vox_crypto::AccountCipher;
use vox_db::queries::payouts::{self, PayoutRow};
use vox_types::{PayoutStatus, Timestamp};

use crate::exchange::ExchangeRateProvider;
use crate::provider::{ProviderError, TransferProvider};
use crate::webhook::{self, TransferEvent, TransferEventKind};
use crate::withdrawal::{self, Transition, WithdrawalConfig, WithdrawalRequest};
use crate::{PaymentError, Result};

/// Narration attached to every outgoing transfer.
pub const TRANSFER_REASON: &str = "Voice validation earnings";

/// Async front of the withdrawal engine.
pub struct WithdrawalService {
    db: Arc<Mutex<Connection>>,
    provider: Arc<dyn TransferProvider>,
    exchange: Arc<dyn ExchangeRateProvider>,
    cipher: AccountCipher,
    webhook_secret: String,
    config: WithdrawalConfig,
}

impl WithdrawalService {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        provider: Arc<dyn TransferProvider>,
        exchange: Arc<dyn ExchangeRateProvider>,
        cipher: AccountCipher,
        webhook_secret: impl Into<String>,
        config: WithdrawalConfig,
    ) -> Self {
        Self {
            db,
            provider,
            exchange,
            cipher,
            webhook_secret: webhook_secret.into(),
            config,
        }
    }

    pub fn config(&self) -> &WithdrawalConfig {
        &self.config
    }

    /// Lock funds and hand the transfer to the provider.
    ///
    /// A repeated idempotency key returns the existing request as it stands,
    /// without calling the provider again.
    pub async fn request_withdrawal(
        &self,
        request: &WithdrawalRequest,
        now: Timestamp,
    ) -> Result<PayoutRow> {
        let locked = {
            let mut conn = self.db.lock().await;
            withdrawal::lock(
                &mut conn,
                &self.config,
                &self.cipher,
                self.exchange.as_ref(),
                request,
                now,
            )?
        };
        if !locked.created {
            return Ok(locked.request);
        }
        self.dispatch(&locked.request, &request.account_number, now).await
    }

    /// Re-send a request left `pending` without a transfer code, e.g. after
    /// a crash between the lock and the provider call, or a transfer step
    /// whose outcome never arrived.
    ///
    /// Only the owner may resume, and only once the previous attempt is
    /// older than the provider timeout. Anything else returns the request
    /// unchanged.
    pub async fn resume(
        &self,
        user_id: &str,
        reference: &str,
        now: Timestamp,
    ) -> Result<PayoutRow> {
        let row = {
            let conn = self.db.lock().await;
            let row = withdrawal::find(&conn, reference)?;
            if row.user_id != user_id {
                return Err(PaymentError::RequestNotFound(reference.to_string()));
            }
            if row.status != PayoutStatus::Pending || row.transfer_code.is_some() {
                return Ok(row);
            }
            let stale_before = now.saturating_sub(self.config.provider_timeout_secs);
            if !payouts::claim_dispatch(&conn, row.id, stale_before, now)? {
                tracing::debug!(reference, "previous dispatch still in flight");
                return Ok(row);
            }
            row
        };
        let account_number = self.cipher.decrypt(&row.account_encrypted)?;
        tracing::info!(reference, "resuming pending withdrawal");
        self.dispatch(&row, &account_number, now).await
    }

    /// Current state of a request.
    pub async fn get(&self, reference: &str) -> Result<PayoutRow> {
        let conn = self.db.lock().await;
        withdrawal::find(&conn, reference)
    }

    /// Verify and apply a provider webhook. Returns `None` for events that
    /// are not transfer outcomes.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: &str,
        now: Timestamp,
    ) -> Result<Option<Transition>> {
        webhook::verify(&self.webhook_secret, body, signature)?;
        match webhook::parse(body)? {
            Some(event) => Ok(Some(self.apply_event(&event, now).await?)),
            None => Ok(None),
        }
    }

    /// Apply a transfer outcome.
    pub async fn apply_event(&self, event: &TransferEvent, now: Timestamp) -> Result<Transition> {
        tracing::info!(
            reference = %event.reference,
            event = event.kind.as_str(),
            "transfer event received"
        );
        let mut conn = self.db.lock().await;
        match event.kind {
            TransferEventKind::Success => withdrawal::complete(&mut conn, &event.reference, now),
            TransferEventKind::Failed => withdrawal::refund(
                &mut conn,
                &event.reference,
                PayoutStatus::Failed,
                event.reason.as_deref(),
                now,
            ),
            TransferEventKind::Reversed => withdrawal::refund(
                &mut conn,
                &event.reference,
                PayoutStatus::Refunded,
                event.reason.as_deref(),
                now,
            ),
        }
    }

    async fn dispatch(
        &self,
        row: &PayoutRow,
        account_number: &str,
        now: Timestamp,
    ) -> Result<PayoutRow> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.provider_timeout_secs);

        // No transfer exists until initiate_transfer is called.
        let recipient = match tokio::time::timeout_at(
            deadline,
            self.provider
                .create_recipient(account_number, &row.bank_code, &row.account_name),
        )
        .await
        {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => return self.fail(row, e.into(), now).await,
            Err(_) => return self.fail(row, self.timed_out(), now).await,
        };

        let outcome = tokio::time::timeout_at(
            deadline,
            self.provider.initiate_transfer(
                &recipient,
                row.amount_minor,
                &row.reference,
                TRANSFER_REASON,
            ),
        )
        .await;

        let receipt = match outcome {
            Ok(Ok(receipt)) if receipt.status.eq_ignore_ascii_case("failed") => {
                let refused = ProviderError::Rejected("transfer failed at initiation".into());
                return self.fail(row, refused.into(), now).await;
            }
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e @ ProviderError::Rejected(_))) => {
                return self.fail(row, e.into(), now).await;
            }
            Ok(Err(e)) => return Err(self.unresolved(row, e.into())),
            Err(_) => return Err(self.unresolved(row, self.timed_out())),
        };

        let mut conn = self.db.lock().await;
        withdrawal::mark_processing(
            &mut conn,
            &row.reference,
            &recipient,
            &receipt.transfer_code,
            now,
        )?;
        tracing::info!(
            reference = %row.reference,
            transfer_code = %receipt.transfer_code,
            provider_status = %receipt.status,
            "transfer initiated"
        );
        withdrawal::find(&conn, &row.reference)
    }

    fn timed_out(&self) -> PaymentError {
        PaymentError::ProviderTimeout(self.config.provider_timeout_secs)
    }

    /// The provider definitely did not send the money: refund and report.
    async fn fail(
        &self,
        row: &PayoutRow,
        failure: PaymentError,
        now: Timestamp,
    ) -> Result<PayoutRow> {
        tracing::warn!(reference = %row.reference, error = %failure, "transfer initiation failed");
        let reason = failure.to_string();
        let mut conn = self.db.lock().await;
        withdrawal::refund(&mut conn, &row.reference, PayoutStatus::Failed, Some(&reason), now)?;
        Err(failure)
    }

    /// The transfer may or may not have gone out. Funds stay locked.
    fn unresolved(&self, row: &PayoutRow, failure: PaymentError) -> PaymentError {
        tracing::warn!(
            reference = %row.reference,
            error = %failure,
            "transfer outcome unknown, awaiting provider webhook"
        );
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::FixedRateExchange;
    use crate::provider::TransferReceipt;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vox_db::queries::profiles::{self, NewProfile};
    use vox_db::transact;
    use vox_ledger::ledger;
    use vox_types::TransactionKind;

    const NOW: Timestamp = 1_700_000_000;
    const SECRET: &str = "sk_test_secret";

    #[derive(Clone, Copy)]
    enum Behavior {
        Accept,
        Reject,
        Hang,
        RecipientDown,
        ConnectionDropped,
    }

    struct FakeProvider {
        behavior: Behavior,
        transfers: AtomicU32,
    }

    impl FakeProvider {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                transfers: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TransferProvider for FakeProvider {
        async fn create_recipient(
            &self,
            account_number: &str,
            _bank_code: &str,
            _name: &str,
        ) -> std::result::Result<String, ProviderError> {
            assert_eq!(account_number, "0123456789");
            match self.behavior {
                Behavior::RecipientDown => Err(ProviderError::Network("connection refused".into())),
                _ => Ok("RCP_fake".to_string()),
            }
        }

        async fn initiate_transfer(
            &self,
            _recipient_code: &str,
            _amount_minor: i64,
            _reference: &str,
            _reason: &str,
        ) -> std::result::Result<TransferReceipt, ProviderError> {
            self.transfers.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Accept => Ok(TransferReceipt {
                    transfer_code: "TRF_fake".to_string(),
                    status: "pending".to_string(),
                }),
                Behavior::Reject => Err(ProviderError::Rejected("Insufficient balance".into())),
                Behavior::Hang => std::future::pending().await,
                Behavior::ConnectionDropped => {
                    Err(ProviderError::Network("connection reset".into()))
                }
                Behavior::RecipientDown => unreachable!("no recipient registered"),
            }
        }
    }

    fn service(behavior: Behavior) -> (WithdrawalService, Arc<FakeProvider>, Arc<Mutex<Connection>>) {
        let mut conn = vox_db::open_memory().expect("open");
        profiles::insert(&conn, &NewProfile::new("u1"), 0).expect("profile");
        transact(&mut conn, |uow| {
            ledger::credit(uow, "u1", 10_000_000, TransactionKind::TopUp, "seed", None, 0)
        })
        .expect("seed");

        let db = Arc::new(Mutex::new(conn));
        let provider = Arc::new(FakeProvider::new(behavior));
        let config = WithdrawalConfig {
            provider_timeout_secs: 1,
            ..WithdrawalConfig::default()
        };
        let svc = WithdrawalService::new(
            db.clone(),
            provider.clone(),
            Arc::new(FixedRateExchange::default()),
            AccountCipher::new([9u8; 32]),
            SECRET,
            config,
        );
        (svc, provider, db)
    }

    fn request(key: &str) -> WithdrawalRequest {
        WithdrawalRequest {
            user_id: "u1".into(),
            amount: 5_000_000,
            account_number: "0123456789".into(),
            bank_code: "058".into(),
            account_name: "Ada Obi".into(),
            idempotency_key: key.into(),
        }
    }

    async fn balances(db: &Arc<Mutex<Connection>>) -> (i64, i64) {
        let conn = db.lock().await;
        let b = ledger::balances(&conn, "u1").expect("balances");
        (b.available, b.pending)
    }

    #[tokio::test]
    async fn test_accepted_transfer_is_processing() {
        let (svc, provider, db) = service(Behavior::Accept);
        let row = svc.request_withdrawal(&request("k1"), NOW).await.expect("withdraw");
        assert_eq!(row.status, PayoutStatus::Processing);
        assert_eq!(row.transfer_code.as_deref(), Some("TRF_fake"));
        assert_eq!(row.recipient_code.as_deref(), Some("RCP_fake"));
        assert_eq!(balances(&db).await, (5_000_000, 5_000_000));

        let again = svc.request_withdrawal(&request("k1"), NOW).await.expect("replay");
        assert_eq!(again.id, row.id);
        assert_eq!(provider.transfers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_transfer_refunds() {
        let (svc, _, db) = service(Behavior::Reject);
        let err = svc
            .request_withdrawal(&request("k1"), NOW)
            .await
            .expect_err("rejected");
        assert_eq!(err.code(), "provider_error");
        assert_eq!(balances(&db).await, (10_000_000, 0));

        let conn = db.lock().await;
        let row = vox_db::queries::payouts::find_by_key(&conn, "k1")
            .expect("find")
            .expect("row");
        assert_eq!(row.status, PayoutStatus::Failed);
        assert!(ledger::reconciles(&conn, "u1").expect("reconcile"));
    }

    #[tokio::test]
    async fn test_timeout_keeps_funds_locked_until_webhook() {
        let (svc, _, db) = service(Behavior::Hang);
        let err = svc
            .request_withdrawal(&request("k1"), NOW)
            .await
            .expect_err("timeout");
        assert!(matches!(err, PaymentError::ProviderTimeout(1)));
        assert_eq!(balances(&db).await, (5_000_000, 5_000_000));

        let reference = {
            let conn = db.lock().await;
            let row = vox_db::queries::payouts::find_by_key(&conn, "k1")
                .expect("find")
                .expect("row");
            assert_eq!(row.status, PayoutStatus::Pending);
            row.reference
        };

        let event = TransferEvent {
            kind: TransferEventKind::Success,
            reference,
            transfer_code: None,
            reason: None,
        };
        let t = svc.apply_event(&event, NOW + 30).await.expect("late success");
        assert_eq!(t, Transition::Applied(PayoutStatus::Completed));

        let (available, pending) = balances(&db).await;
        assert_eq!(available + pending, 10_000_000 - 5_000_000);
        let conn = db.lock().await;
        assert!(ledger::reconciles(&conn, "u1").expect("reconcile"));
    }

    #[tokio::test]
    async fn test_dropped_transfer_call_is_not_refunded() {
        let (svc, _, db) = service(Behavior::ConnectionDropped);
        let err = svc
            .request_withdrawal(&request("k1"), NOW)
            .await
            .expect_err("network");
        assert_eq!(err.code(), "provider_error");
        assert_eq!(balances(&db).await, (5_000_000, 5_000_000));
    }

    #[tokio::test]
    async fn test_recipient_failure_refunds() {
        let (svc, provider, db) = service(Behavior::RecipientDown);
        svc.request_withdrawal(&request("k1"), NOW)
            .await
            .expect_err("recipient");
        assert_eq!(balances(&db).await, (10_000_000, 0));
        assert_eq!(provider.transfers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_signed_webhook_completes() {
        let (svc, _, db) = service(Behavior::Accept);
        let row = svc.request_withdrawal(&request("k1"), NOW).await.expect("withdraw");

        let body = format!(
            r#"{{"event":"transfer.success","data":{{"reference":"{}"}}}}"#,
            row.reference
        );
        let signature =
            vox_crypto::hmac::sign_sha512(SECRET.as_bytes(), body.as_bytes()).expect("sign");

        let t = svc
            .handle_webhook(body.as_bytes(), &signature, NOW + 5)
            .await
            .expect("webhook");
        assert_eq!(t, Some(Transition::Applied(PayoutStatus::Completed)));
        assert_eq!(balances(&db).await, (5_000_000, 0));

        let t = svc
            .handle_webhook(body.as_bytes(), &signature, NOW + 6)
            .await
            .expect("redelivery");
        assert_eq!(t, Some(Transition::Unchanged(PayoutStatus::Completed)));
    }

    #[tokio::test]
    async fn test_unsigned_webhook_rejected() {
        let (svc, _, _) = service(Behavior::Accept);
        let body = br#"{"event":"transfer.success","data":{"reference":"wd_x"}}"#;
        let err = svc
            .handle_webhook(body, &hex::encode([0u8; 64]), NOW)
            .await
            .expect_err("unsigned");
        assert!(matches!(err, PaymentError::InvalidSignature));
    }

    async fn lock_only(svc: &WithdrawalService, db: &Arc<Mutex<Connection>>) -> PayoutRow {
        let mut conn = db.lock().await;
        withdrawal::lock(
            &mut conn,
            svc.config(),
            &AccountCipher::new([9u8; 32]),
            &FixedRateExchange::default(),
            &request("k1"),
            NOW,
        )
        .expect("lock")
        .request
    }

    #[tokio::test]
    async fn test_resume_pending_request() {
        let (svc, provider, db) = service(Behavior::Accept);
        let locked = lock_only(&svc, &db).await;

        let row = svc.resume("u1", &locked.reference, NOW + 60).await.expect("resume");
        assert_eq!(row.status, PayoutStatus::Processing);
        assert_eq!(provider.transfers.load(Ordering::SeqCst), 1);

        let row = svc.resume("u1", &locked.reference, NOW + 61).await.expect("no-op");
        assert_eq!(row.status, PayoutStatus::Processing);
        assert_eq!(provider.transfers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resume_skips_live_dispatch() {
        let (svc, provider, db) = service(Behavior::Accept);
        let locked = lock_only(&svc, &db).await;

        let row = svc.resume("u1", &locked.reference, NOW).await.expect("too early");
        assert_eq!(row.status, PayoutStatus::Pending);
        assert_eq!(provider.transfers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resume_by_other_user_not_found() {
        let (svc, provider, db) = service(Behavior::Accept);
        let locked = lock_only(&svc, &db).await;

        let err = svc
            .resume("u2", &locked.reference, NOW + 60)
            .await
            .expect_err("not owner");
        assert!(matches!(err, PaymentError::RequestNotFound(_)));
        assert_eq!(provider.transfers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resume_right_after_timeout_waits() {
        let (svc, _, db) = service(Behavior::Hang);
        svc.request_withdrawal(&request("k1"), NOW)
            .await
            .expect_err("timeout");
        let reference = {
            let conn = db.lock().await;
            vox_db::queries::payouts::find_by_key(&conn, "k1")
                .expect("find")
                .expect("row")
                .reference
        };

        let row = svc.resume("u1", &reference, NOW).await.expect("in flight");
        assert_eq!(row.status, PayoutStatus::Pending);
        assert_eq!(balances(&db).await, (5_000_000, 5_000_000));
    }
}
