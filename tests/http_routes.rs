mod common;

use common::{for_event, pending_payment, Harness};
use payments_reconciler::domain::payment::PaymentStatus;
use payments_reconciler::domain::transaction::TransactionType;
use payments_reconciler::http::middleware::admin_auth::INTERNAL_API_KEY_HEADER;
use payments_reconciler::http::handlers::webhooks::SIGNATURE_HEADER;
use payments_reconciler::http::routes::router;
use payments_reconciler::ratelimit::limiter::{RateLimiter, RateLimits};
use payments_reconciler::repo::ledger_store::LedgerStore;
use payments_reconciler::service::callback::sign_body;
use payments_reconciler::service::sync_service::SyncParams;
use payments_reconciler::AppState;
use std::sync::Arc;
use std::time::Duration;

async fn serve(h: &Harness) -> String {
    let state = AppState {
        sync_service: h.sync(),
        reconciliation_service: h.reconciliation(),
        store: Arc::new(h.store.clone()),
        limiter: Arc::new(RateLimiter::new(RateLimits::default(), Duration::from_secs(1))),
        sync_params: SyncParams::default(),
        callback_secret: Some("whsec".to_string()),
    };
    let app = router(state, "op_key".to_string());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn signed_gateway_callback_needs_no_internal_key() {
    let h = Harness::new();
    h.store
        .insert_payment(for_event(pending_payment("pay_1", Some("tx_1"), 1), "evt_1", 1))
        .await;
    h.gateway.set_status("tx_1", "000", TransactionType::Charge);
    let base = serve(&h).await;
    let http = reqwest::Client::new();

    let body = br#"{"transaction":{"uid":"tx_1","status_code":"000","payment_reference":"pay_1"}}"#.to_vec();
    let unsigned = http
        .post(format!("{base}/webhooks/gateway"))
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(unsigned.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(h.store.entitlement_count().await, 0);

    let signed = http
        .post(format!("{base}/webhooks/gateway"))
        .header(SIGNATURE_HEADER, sign_body("whsec", &body).unwrap())
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(signed.status(), reqwest::StatusCode::OK);

    let payment = h.store.get_payment("pay_1").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(h.store.entitlement_count().await, 1);
}

#[tokio::test]
async fn operator_routes_require_internal_key() {
    let h = Harness::new();
    let base = serve(&h).await;
    let http = reqwest::Client::new();

    let anonymous = http.get(format!("{base}/runs")).send().await.unwrap();
    assert_eq!(anonymous.status(), reqwest::StatusCode::UNAUTHORIZED);
    let sync = http.post(format!("{base}/sync/run")).send().await.unwrap();
    assert_eq!(sync.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert!(h.store.run_logs().await.is_empty());

    let operator = http
        .get(format!("{base}/runs"))
        .header(INTERNAL_API_KEY_HEADER, "op_key")
        .send()
        .await
        .unwrap();
    assert_eq!(operator.status(), reqwest::StatusCode::OK);

    let live = http.get(format!("{base}/ops/liveness")).send().await.unwrap();
    assert_eq!(live.status(), reqwest::StatusCode::OK);
}
