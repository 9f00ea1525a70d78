//! Route handlers

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use loadshed_infra::{ErrorResponse, METRICS_CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Upper bound on simulated work per request.
pub const MAX_WORK_MS: u64 = 5_000;

pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "hello" }))
}

#[derive(Debug, Deserialize)]
pub struct WorkParams {
    #[serde(default)]
    pub ms: u64,
}

#[derive(Debug, Serialize)]
pub struct WorkResponse {
    pub worked_ms: u64,
}

/// Burn CPU for `ms` milliseconds on the blocking pool.
pub async fn work(Query(params): Query<WorkParams>) -> Response {
    let budget = Duration::from_millis(params.ms.min(MAX_WORK_MS));

    let result = tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        let mut counter: u64 = 0;
        while start.elapsed() < budget {
            counter = std::hint::black_box(counter.wrapping_add(1));
        }
        start.elapsed()
    })
    .await;

    match result {
        Ok(elapsed) => Json(WorkResponse {
            worked_ms: elapsed.as_millis() as u64,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Simulated work task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal error").with_details(e.to_string())),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub utilization: u32,
    pub limit: u32,
    pub admitted: u64,
    pub shed: u64,
}

/// Current gate view. Reports `shedding` while new requests would be rejected.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let gate = &state.gate;
    let utilization = gate.utilization();
    let status = if utilization >= gate.limit() {
        "shedding"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        utilization,
        limit: gate.limit(),
        admitted: gate.admitted_count(),
        shed: gate.shed_count(),
    })
}

/// Prometheus scrape endpoint for the HTTP metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal error").with_details(e.to_string())),
            )
                .into_response()
        }
    }
}
