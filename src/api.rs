//! HTTP trigger surface: submit ingestion jobs and poll their outcome.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::ingest::job::JobQueue;
use crate::ingest::types::ProviderSelector;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub queue: JobQueue,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ingest", post(trigger_ingest))
        .route("/jobs/{id}", get(job_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Same as [`router`] plus `/metrics`.
pub fn router_with_metrics(state: AppState, metrics: &Metrics) -> Router {
    router(state).merge(metrics.router())
}

#[derive(serde::Deserialize)]
struct IngestParams {
    #[serde(default)]
    source: Option<String>,
}

async fn trigger_ingest(
    State(state): State<AppState>,
    Query(params): Query<IngestParams>,
) -> Response {
    let raw = params.source.unwrap_or_else(|| "all".to_string());
    let selector = match raw.parse::<ProviderSelector>() {
        Ok(s) => s,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string(), "allowed": ProviderSelector::allowed_values() })),
            )
                .into_response()
        }
    };

    match state.queue.submit(selector) {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "job_id": job_id, "status": "submitted", "source": selector })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, source = %selector, "ingest submission failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn job_status(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.queue.status(id) {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown job {id}") })),
        )
            .into_response(),
    }
}
