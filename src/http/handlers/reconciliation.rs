use crate::service::reconciliation::ReconciliationResult;
use crate::service::report::render_report;
use crate::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

fn default_days_back() -> i64 {
    7
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default = "default_days_back")]
    pub days_back: i64,
    #[serde(default)]
    pub auto_fix: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    #[serde(default)]
    pub auto_fix: bool,
}

fn respond(outcome: anyhow::Result<ReconciliationResult>) -> Response {
    match outcome {
        Ok(result) => {
            let report = render_report(&result);
            (
                StatusCode::OK,
                Json(serde_json::json!({"result": result, "report": report})),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": format!("{e:#}")})),
        )
            .into_response(),
    }
}

pub async fn run_reconciliation(
    State(state): State<AppState>,
    Json(req): Json<ReconcileRequest>,
) -> impl IntoResponse {
    if !(1..=90).contains(&req.days_back) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "days_back must be between 1 and 90"})),
        )
            .into_response();
    }
    respond(
        state
            .reconciliation_service
            .reconcile_recent(req.days_back, req.auto_fix)
            .await,
    )
}

pub async fn import_export(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    body: String,
) -> impl IntoResponse {
    if body.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "empty export"})),
        )
            .into_response();
    }
    respond(
        state
            .reconciliation_service
            .reconcile_import(&body, None, query.auto_fix)
            .await,
    )
}
