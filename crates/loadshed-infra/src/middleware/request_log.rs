use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request},
    http::header,
    middleware::Next,
    response::Response,
};

use super::request_id::get_request_id;
use super::response_size;

/// Emits one structured `info` event per request once the response is ready.
///
/// Place it outside the load shedding layer to also record shed requests
/// (status 429). The request ID is only present when `request_id_middleware`
/// runs before this one.
pub async fn request_log_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let version = request.version();
    let scheme = request
        .uri()
        .scheme_str()
        .unwrap_or("http")
        .to_string();
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let remote_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let request_id = get_request_id(&request).unwrap_or_default();

    let response = next.run(request).await;
    let elapsed = start.elapsed();
    let bytes = response_size(&response);

    tracing::info!(
        method = %method,
        scheme = %scheme,
        path = %path,
        proto = ?version,
        host = %host,
        remote_ip = %remote_ip,
        request_id = %request_id,
        status_code = response.status().as_u16(),
        bytes = bytes,
        duration_ms = elapsed.as_secs_f64() * 1000.0,
        duration_display = ?elapsed,
        "incoming request"
    );

    response
}
