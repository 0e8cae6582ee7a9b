//! Integration test: balances always equal the sum of the transaction log.
//!
//! Runs a mixed workload (plain and remix settlements, referral kickbacks,
//! withdrawals that complete and fail) and reconciles every profile after
//! each step.

use std::sync::Arc;

use tokio::sync::Mutex;
use vox_consensus::Submission;
use vox_db::queries::profiles::{self, NewProfile};
use vox_integration_tests::{
    add_clip, add_profile, signed_event, test_cipher, top_up, validation_service,
    AcceptingProvider, TestDb, PROVIDER_SECRET, TEST_TIMESTAMP,
};
use vox_ledger::ledger;
use vox_payments::{FixedRateExchange, WithdrawalConfig, WithdrawalRequest, WithdrawalService};

const USERS: [&str; 6] = ["referrer", "owner", "remixer", "v1", "v2", "v3"];

fn assert_reconciled(db: &TestDb) {
    let conn = db.connect();
    for user in USERS {
        assert!(
            ledger::reconciles(&conn, user).expect("reconcile"),
            "ledger and log disagree for {user}"
        );
    }
}

#[tokio::test]
async fn mixed_workload_keeps_ledger_consistent() {
    let db = TestDb::new();
    {
        let mut conn = db.connect();
        add_profile(&conn, "referrer");
        profiles::insert(&conn, &NewProfile::new("owner").referred_by("referrer"), 0)
            .expect("owner");
        for user in ["remixer", "v1", "v2", "v3"] {
            add_profile(&conn, user);
        }
        add_clip(&conn, "c1", "owner", None);
        add_clip(&conn, "c2", "remixer", Some("c1"));
        add_clip(&conn, "c3", "owner", None);
        top_up(&mut conn, "v1", 10_000_000);
    }
    assert_reconciled(&db);

    let validation = validation_service();
    let mut conn = db.connect();
    for (clip, approve) in [("c1", true), ("c2", true), ("c3", false)] {
        for v in ["v1", "v2", "v3"] {
            validation
                .submit(
                    &mut conn,
                    &Submission {
                        validator_id: v.to_string(),
                        clip_id: clip.to_string(),
                        is_valid: approve,
                        feedback: None,
                    },
                    TEST_TIMESTAMP,
                )
                .expect("vote");
        }
        assert_reconciled(&db);
    }

    // Owner's plain approval paid a 5% kickback to the referrer.
    assert_eq!(ledger::balances(&conn, "referrer").expect("referrer").available, 5_000);

    let withdrawals = WithdrawalService::new(
        Arc::new(Mutex::new(db.connect())),
        Arc::new(AcceptingProvider),
        Arc::new(FixedRateExchange::default()),
        test_cipher(),
        PROVIDER_SECRET,
        WithdrawalConfig::default(),
    );
    for (key, event) in [("w1", "transfer.success"), ("w2", "transfer.failed")] {
        let row = withdrawals
            .request_withdrawal(
                &WithdrawalRequest {
                    user_id: "v1".to_string(),
                    amount: 2_000_000,
                    account_number: "0123456789".to_string(),
                    bank_code: "058".to_string(),
                    account_name: "Val One".to_string(),
                    idempotency_key: key.to_string(),
                },
                TEST_TIMESTAMP,
            )
            .await
            .expect("withdraw");
        assert_reconciled(&db);

        let (body, signature) = signed_event(event, &row.reference);
        withdrawals
            .handle_webhook(&body, &signature, TEST_TIMESTAMP + 30)
            .await
            .expect("webhook");
        assert_reconciled(&db);
    }

    let v1 = ledger::balances(&conn, "v1").expect("v1");
    // Top-up, three agreeing votes, minus one completed withdrawal.
    assert_eq!(v1.available, 10_000_000 + 3 * 20_000 - 2_000_000);
    assert_eq!(v1.pending, 0);
}
