//! Route configuration and setup

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use loadshed_infra::{
    http_metrics_middleware, request_id_middleware, request_log_middleware, LoadShedLayer,
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Setup all application routes
///
/// Layer order, outermost first: request ID, request log, trace, HTTP
/// metrics, load shedding. Shed requests are therefore still logged, counted
/// and carry a request ID. `/metrics` follows the same gate setting as
/// `/health`.
pub fn setup_routes(state: Arc<AppState>) -> Router {
    let shed_layer = LoadShedLayer::new(state.gate.clone());

    let gated_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/work", get(handlers::work));
    let health_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics));

    let routes = if state.config.health_bypasses_gate {
        gated_routes.layer(shed_layer).merge(health_routes)
    } else {
        gated_routes.merge(health_routes).layer(shed_layer)
    };

    routes
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            http_metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_log_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
