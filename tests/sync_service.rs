mod common;

use common::{for_event, for_pass, pass_type, pending_payment, Harness};
use payments_reconciler::domain::entitlement::{Entitlement, EntitlementKind};
use payments_reconciler::domain::payment::{PaymentMetadata, PaymentStatus};
use payments_reconciler::domain::run_log::{RunKind, RunStatus};
use payments_reconciler::domain::transaction::TransactionType;
use payments_reconciler::gateways::{GatewayCallError, TransactionStatus, TransportError, TransportErrorKind};
use payments_reconciler::repo::ledger_store::LedgerStore;
use payments_reconciler::service::alerting::{STUCK_PAYMENTS, SYNC_FAILURE_RATE};
use payments_reconciler::service::entitlements::GrantOutcome;
use payments_reconciler::service::sync_service::{SyncOutcomeKind, SyncParams};
use serde_json::json;

fn timeout() -> GatewayCallError {
    GatewayCallError::Transport(TransportError {
        kind: TransportErrorKind::Timeout,
        message: "read timed out".to_string(),
    })
}

#[tokio::test]
async fn successful_charge_completes_payment_and_issues_pass() {
    let h = Harness::new();
    h.store.insert_pass_type(pass_type("pass_10", 10)).await;
    h.store
        .insert_payment(for_pass(pending_payment("pay_1", Some("tx_1"), 2), "pass_10"))
        .await;
    h.gateway.set_status("tx_1", "000", TransactionType::Charge);

    let summary = h.sync().run(SyncParams::default()).await.unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(
        summary.outcomes[0].entitlement,
        Some(GrantOutcome::Created(EntitlementKind::Pass))
    );

    let payment = h.store.get_payment("pay_1").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert!(payment.completed_at.is_some());

    let entitlements = h.store.entitlements_for_payment("pay_1").await.unwrap();
    assert_eq!(entitlements.len(), 1);
    match &entitlements[0] {
        Entitlement::Pass(pass) => {
            assert_eq!(pass.total_entries, 10);
            assert_eq!(pass.remaining_entries, 10);
            assert!(pass.expires_at.is_some());
        }
        other => panic!("expected a pass, got {other:?}"),
    }
}

#[tokio::test]
async fn rerunning_sync_never_grants_twice() {
    let h = Harness::new();
    h.store
        .insert_payment(for_event(pending_payment("pay_1", Some("tx_1"), 1), "evt_7", 2))
        .await;
    h.gateway.set_status("tx_1", "000", TransactionType::Charge);
    let sync = h.sync();

    sync.run(SyncParams::default()).await.unwrap();
    let second = sync.run(SyncParams::default()).await.unwrap();
    assert_eq!(second.checked, 0);
    assert_eq!(h.store.entitlement_count().await, 1);

    // A stale snapshot replayed through the update path loses the status race.
    let stale = pending_payment("pay_1", Some("tx_1"), 1);
    let status = TransactionStatus {
        transaction_uid: "tx_1".to_string(),
        status_code: "000".to_string(),
        description: "approved".to_string(),
        transaction_type: Some(TransactionType::Charge),
        amount_minor: Some(8000),
    };
    let outcome = sync.apply_gateway_status(&stale, &status).await;
    assert_eq!(outcome.outcome, SyncOutcomeKind::Skipped);
    assert_eq!(h.store.entitlement_count().await, 1);

    match &h.store.entitlements_for_payment("pay_1").await.unwrap()[0] {
        Entitlement::Registration(r) => {
            assert_eq!(r.event_id, "evt_7");
            assert_eq!(r.quantity, 2);
            assert_eq!(r.ticket_type, "regular");
        }
        other => panic!("expected a registration, got {other:?}"),
    }
}

#[tokio::test]
async fn transport_failure_marks_record_failed_and_batch_continues() {
    let h = Harness::new();
    h.store.insert_payment(pending_payment("pay_a", Some("tx_a"), 1)).await;
    h.store.insert_payment(pending_payment("pay_b", Some("tx_b"), 2)).await;
    h.gateway.set_status_error("tx_a", timeout());
    h.gateway.set_status("tx_b", "000", TransactionType::Charge);

    let summary = h.sync().run(SyncParams::default()).await.unwrap();
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.status, RunStatus::Partial);

    let a = h.store.get_payment("pay_a").await.unwrap().unwrap();
    assert_eq!(a.status, PaymentStatus::Pending);
    let b = h.store.get_payment("pay_b").await.unwrap().unwrap();
    assert_eq!(b.status, PaymentStatus::Completed);

    let runs = h.store.run_logs().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].kind, RunKind::Sync);
    assert_eq!(runs[0].status, RunStatus::Partial);
    assert_eq!(runs[0].counts.failed, 1);
    assert_eq!(runs[0].details["gateway"], "mock");
}

#[tokio::test]
async fn declined_payment_fails_without_entitlement() {
    let h = Harness::new();
    h.store
        .insert_payment(for_event(pending_payment("pay_1", Some("tx_1"), 1), "evt_1", 1))
        .await;
    h.gateway.set_status("tx_1", "033", TransactionType::Charge);

    let summary = h.sync().run(SyncParams::default()).await.unwrap();
    assert_eq!(summary.updated, 1);
    let payment = h.store.get_payment("pay_1").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(payment.completed_at.is_none());
    assert_eq!(h.store.entitlement_count().await, 0);
}

#[tokio::test]
async fn payment_without_transaction_uid_is_skipped_without_gateway_call() {
    let h = Harness::new();
    h.store.insert_payment(pending_payment("pay_1", None, 1)).await;

    let summary = h.sync().run(SyncParams::default()).await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.outcomes[0].outcome, SyncOutcomeKind::Skipped);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn old_and_excess_payments_are_left_for_later() {
    let h = Harness::new();
    h.store.insert_payment(pending_payment("pay_old", Some("tx_old"), 100)).await;
    for i in 0..3 {
        let uid = format!("tx_{i}");
        h.store
            .insert_payment(pending_payment(&format!("pay_{i}"), Some(&uid), i + 1))
            .await;
        h.gateway.set_status(&uid, "000", TransactionType::Charge);
    }

    let summary = h
        .sync()
        .run(SyncParams {
            max_age_hours: 72,
            limit: 2,
        })
        .await
        .unwrap();
    assert_eq!(summary.checked, 2);
    let checked: Vec<&str> = summary.outcomes.iter().map(|o| o.payment_id.as_str()).collect();
    assert_eq!(checked, vec!["pay_0", "pay_1"]);
}

#[tokio::test]
async fn high_failure_rate_raises_alert() {
    let h = Harness::new();
    for i in 0..3 {
        let uid = format!("tx_{i}");
        h.store
            .insert_payment(pending_payment(&format!("pay_{i}"), Some(&uid), 1))
            .await;
        if i < 2 {
            h.gateway.set_status_error(&uid, timeout());
        } else {
            h.gateway.set_status(&uid, "000", TransactionType::Charge);
        }
    }

    let summary = h.sync().run(SyncParams::default()).await.unwrap();
    assert!(summary.alert_id.is_some());
    let alerts = h.store.alerts(None).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, SYNC_FAILURE_RATE);
    assert_eq!(alerts[0].run_log_id, Some(summary.run_id));
}

#[tokio::test]
async fn unreadable_pending_set_aborts_and_records_failed_run() {
    let h = Harness::new();
    h.store.insert_payment(pending_payment("pay_1", Some("tx_1"), 1)).await;
    h.store.set_reads_unavailable(true).await;

    assert!(h.sync().run(SyncParams::default()).await.is_err());
    let runs = h.store.run_logs().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].error_message.is_some());
    assert!(runs[0].finished_at.is_some());
}

#[tokio::test]
async fn stuck_payments_are_reported_oldest_first_without_changes() {
    let h = Harness::new();
    h.store.insert_payment(pending_payment("pay_recent", Some("tx_r"), 2)).await;
    h.store.insert_payment(pending_payment("pay_30h", Some("tx_30"), 30)).await;
    h.store.insert_payment(pending_payment("pay_50h", Some("tx_50"), 50)).await;

    let report = h.sync().detect_stuck_payments().await.unwrap();
    let ids: Vec<&str> = report.payments.iter().map(|p| p.payment_id.as_str()).collect();
    assert_eq!(ids, vec!["pay_50h", "pay_30h"]);
    assert!(report.payments[0].age_hours >= 49);

    let alerts = h.store.alerts(None).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, STUCK_PAYMENTS);
    assert!(alerts[0].message.contains("pay_50h"));

    let still = h.store.get_payment("pay_50h").await.unwrap().unwrap();
    assert_eq!(still.status, PaymentStatus::Pending);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn unknown_pass_type_leaves_payment_pending_until_it_exists() {
    let h = Harness::new();
    h.store
        .insert_payment(for_pass(pending_payment("pay_1", Some("tx_1"), 1), "pass_missing"))
        .await;
    h.gateway.set_status("tx_1", "000", TransactionType::Charge);
    let sync = h.sync();

    let first = sync.run(SyncParams::default()).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.updated, 0);
    assert!(first.outcomes[0].message.contains("pass_missing"));
    let payment = h.store.get_payment("pay_1").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.completed_at.is_none());
    assert_eq!(h.store.entitlement_count().await, 0);

    h.store.insert_pass_type(pass_type("pass_missing", 5)).await;
    let second = sync.run(SyncParams::default()).await.unwrap();
    assert_eq!(second.checked, 1);
    assert_eq!(second.updated, 1);
    assert_eq!(
        second.outcomes[0].entitlement,
        Some(GrantOutcome::Created(EntitlementKind::Pass))
    );
    let payment = h.store.get_payment("pay_1").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(h.store.entitlement_count().await, 1);
}

#[tokio::test]
async fn in_progress_gateway_status_is_skipped_on_every_run() {
    let h = Harness::new();
    h.store
        .insert_payment(for_event(pending_payment("pay_1", Some("tx_1"), 1), "evt_1", 1))
        .await;
    h.gateway.set_status("tx_1", "001", TransactionType::Charge);
    let sync = h.sync();

    for _ in 0..2 {
        let summary = sync.run(SyncParams::default()).await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.outcomes[0].outcome, SyncOutcomeKind::Skipped);
        assert_eq!(summary.outcomes[0].gateway_status_code.as_deref(), Some("001"));
    }
    let payment = h.store.get_payment("pay_1").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(h.store.entitlement_count().await, 0);
    assert_eq!(h.gateway.calls(), vec!["check_status:tx_1", "check_status:tx_1"]);
}

#[tokio::test]
async fn loosely_typed_metadata_still_syncs() {
    let h = Harness::new();
    let mut payment = pending_payment("pay_1", None, 1);
    payment.metadata = PaymentMetadata::from_json(json!({
        "gateway_transaction_uid": "tx_1",
        "event_id": "evt_1",
        "quantity": "2"
    }));
    h.store.insert_payment(payment).await;
    h.gateway.set_status("tx_1", "000", TransactionType::Charge);

    let summary = h.sync().run(SyncParams::default()).await.unwrap();
    assert_eq!(summary.updated, 1);
    match &h.store.entitlements_for_payment("pay_1").await.unwrap()[0] {
        Entitlement::Registration(r) => assert_eq!(r.quantity, 2),
        other => panic!("expected a registration, got {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_metadata_is_reported_as_failed_not_skipped() {
    let h = Harness::new();
    let mut bad_uid = pending_payment("pay_uid", None, 1);
    bad_uid.metadata = PaymentMetadata::from_json(json!({"gateway_transaction_uid": ["tx_1"]}));
    let mut bad_quantity = pending_payment("pay_qty", None, 2);
    bad_quantity.metadata = PaymentMetadata::from_json(json!({
        "gateway_transaction_uid": "tx_2",
        "event_id": "evt_1",
        "quantity": "two"
    }));
    h.store.insert_payment(bad_uid).await;
    h.store.insert_payment(bad_quantity).await;
    h.gateway.set_status("tx_2", "000", TransactionType::Charge);

    let summary = h.sync().run(SyncParams::default()).await.unwrap();
    assert_eq!(summary.failed, 2);
    assert!(summary
        .outcomes
        .iter()
        .all(|o| o.outcome == SyncOutcomeKind::Failed && o.message.contains("unreadable metadata")));

    let untouched = h.store.get_payment("pay_qty").await.unwrap().unwrap();
    assert_eq!(untouched.status, PaymentStatus::Pending);
    assert_eq!(h.store.entitlement_count().await, 0);
    assert_eq!(h.gateway.calls(), vec!["check_status:tx_2"]);
}
