mod common;

use common::{for_event, pending_payment, Harness};
use payments_reconciler::domain::payment::PaymentStatus;
use payments_reconciler::domain::transaction::TransactionType;
use payments_reconciler::error::DataIntegrityError;
use payments_reconciler::repo::ledger_store::LedgerStore;
use payments_reconciler::service::callback::{
    process_callback, sign_body, verify_callback, verify_signature, CallbackError,
};
use payments_reconciler::service::sync_service::SyncOutcomeKind;
use serde_json::json;

#[test]
fn callback_needs_nested_transaction_with_all_fields() {
    for payload in [
        json!({"uid": "tx_1", "status_code": "000", "payment_reference": "pay_1"}),
        json!({"transaction": {"status_code": "000", "payment_reference": "pay_1"}}),
        json!({"transaction": {"uid": "tx_1", "payment_reference": "pay_1"}}),
        json!({"transaction": {"uid": " ", "status_code": "000", "payment_reference": "pay_1"}}),
    ] {
        assert!(
            matches!(verify_callback(&payload), Err(DataIntegrityError::InvalidCallback(_))),
            "accepted {payload}"
        );
    }

    let ok = verify_callback(&json!({
        "transaction": {"uid": "tx_1", "status_code": "000", "payment_reference": "pay_1"}
    }))
    .unwrap();
    assert_eq!(ok.transaction_uid, "tx_1");
    assert_eq!(ok.payment_id, "pay_1");
}

#[test]
fn tampered_body_fails_signature_check() {
    let body = br#"{"transaction":{"uid":"tx_1","status_code":"000","payment_reference":"pay_1"}}"#;
    let signature = sign_body("whsec", body).unwrap();
    assert!(verify_signature("whsec", body, &signature).is_ok());

    let tampered = br#"{"transaction":{"uid":"tx_1","status_code":"000","payment_reference":"pay_2"}}"#;
    assert!(verify_signature("whsec", tampered, &signature).is_err());
    assert!(verify_signature("whsec", body, "not-hex").is_err());
}

#[tokio::test]
async fn verified_callback_uses_gateway_status_and_grants_once() {
    let h = Harness::new();
    h.store
        .insert_payment(for_event(pending_payment("pay_1", Some("tx_1"), 1), "evt_1", 1))
        .await;
    h.gateway.set_status("tx_1", "000", TransactionType::Charge);
    let sync = h.sync();

    let callback = verify_callback(&json!({
        "transaction": {"uid": "tx_1", "status_code": "000", "payment_reference": "pay_1"}
    }))
    .unwrap();

    let first = process_callback(&sync, &callback).await.unwrap();
    assert_eq!(first.outcome, SyncOutcomeKind::Updated);
    let duplicate = process_callback(&sync, &callback).await.unwrap();
    assert_eq!(duplicate.outcome, SyncOutcomeKind::Skipped);

    let payment = h.store.get_payment("pay_1").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(h.store.entitlement_count().await, 1);
    assert_eq!(h.gateway.calls(), vec!["check_status:tx_1", "check_status:tx_1"]);
}

#[tokio::test]
async fn callback_for_foreign_transaction_is_rejected() {
    let h = Harness::new();
    h.store.insert_payment(pending_payment("pay_1", Some("tx_1"), 1)).await;

    let callback = verify_callback(&json!({
        "transaction": {"uid": "tx_other", "status_code": "000", "payment_reference": "pay_1"}
    }))
    .unwrap();
    let err = process_callback(&h.sync(), &callback).await.unwrap_err();
    assert!(matches!(err, CallbackError::Rejected(DataIntegrityError::InvalidCallback(_))));

    let missing = verify_callback(&json!({
        "transaction": {"uid": "tx_1", "status_code": "000", "payment_reference": "pay_404"}
    }))
    .unwrap();
    let err = process_callback(&h.sync(), &missing).await.unwrap_err();
    assert!(matches!(err, CallbackError::Rejected(DataIntegrityError::MissingPayment { .. })));
    assert!(h.gateway.calls().is_empty());
}
