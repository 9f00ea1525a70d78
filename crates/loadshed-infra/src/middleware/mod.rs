//! HTTP middleware for loadshed services
//!
//! `load_shedding` is the admission gate; `request_id`, `request_log` and
//! `http_metrics` are the peers it is usually composed with.

#[cfg(feature = "http-metrics")]
pub mod http_metrics;
pub mod load_shedding;
pub mod request_id;
pub mod request_log;

#[cfg(feature = "http-metrics")]
pub use http_metrics::{http_metrics_middleware, HttpMetrics, METRICS_CONTENT_TYPE};
pub use load_shedding::{
    load_shedding_middleware, Admission, LoadShed, LoadShedGate, LoadShedLayer,
};
pub use request_id::{get_request_id, request_id_middleware, RequestId, REQUEST_ID_HEADER};
pub use request_log::request_log_middleware;

use axum::{body::HttpBody, http::header, response::Response};

/// Response body size in bytes: the exact body size when known up front,
/// otherwise the `Content-Length` header, otherwise 0 (streamed bodies).
pub(crate) fn response_size(response: &Response) -> u64 {
    if let Some(exact) = response.body().size_hint().exact() {
        return exact;
    }

    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}
