use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::metrics::MetricsRegistry;

pub struct AppState {
    pub metrics: Arc<MetricsRegistry>,
}

// GET /api/health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        json!({
            "status": "healthy",
            "service": "sqlproxy-fe",
            "tracked_databases": state.metrics.tracked_databases(),
        })
        .to_string(),
    )
}

// GET /api/metrics/databases
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

// GET /api/metrics/databases/:db
pub async fn database_metrics_handler(
    State(state): State<Arc<AppState>>,
    Path(db): Path<String>,
) -> impl IntoResponse {
    Json(json!({
        "database": db,
        "metrics": state.metrics.database_metrics(&db),
    }))
}
