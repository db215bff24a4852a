use crate::service::sync_service::SyncParams;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct SyncRunRequest {
    pub max_age_hours: Option<i64>,
    pub limit: Option<i64>,
}

impl SyncRunRequest {
    fn params(&self, defaults: SyncParams) -> SyncParams {
        SyncParams {
            max_age_hours: self.max_age_hours.unwrap_or(defaults.max_age_hours).max(0),
            limit: self.limit.unwrap_or(defaults.limit).clamp(0, 1000),
        }
    }
}

pub async fn run_sync(
    State(state): State<AppState>,
    body: Option<Json<SyncRunRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    match state.sync_service.run(req.params(state.sync_params)).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": format!("{e:#}")})),
        )
            .into_response(),
    }
}

pub async fn detect_stuck(State(state): State<AppState>) -> impl IntoResponse {
    match state.sync_service.detect_stuck_payments().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": format!("{e:#}")})),
        )
            .into_response(),
    }
}
