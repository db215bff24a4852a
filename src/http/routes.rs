use crate::http::handlers::{ops, reconciliation, runs, sync, webhooks};
use crate::http::middleware::admin_auth::require_internal_api_key;
use crate::AppState;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

/// Operator routes sit behind the internal key. Health probes and the
/// gateway callback stay open; callbacks carry their own HMAC signature.
pub fn router(state: AppState, internal_api_key: String) -> Router {
    let admin_routes = Router::new()
        .route("/sync/run", post(sync::run_sync))
        .route("/sync/stuck", post(sync::detect_stuck))
        .route("/reconciliation/run", post(reconciliation::run_reconciliation))
        .route("/reconciliation/import", post(reconciliation::import_export))
        .route("/runs", get(runs::recent_runs))
        .route("/alerts", get(runs::list_alerts))
        .route("/ratelimit", get(runs::rate_limit_usage))
        .layer(from_fn_with_state(internal_api_key, require_internal_api_key));

    Router::new()
        .route("/ops/readiness", get(ops::readiness))
        .route("/ops/liveness", get(ops::liveness))
        .route("/webhooks/gateway", post(webhooks::gateway_callback))
        .merge(admin_routes)
        .with_state(state)
}
