use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{
    exponential_buckets, HistogramOpts, HistogramVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder, DEFAULT_BUCKETS,
};

use super::response_size;

const SUBSYSTEM: &str = "http";
const REQUEST_LABELS: [&str; 4] = ["service", "handler", "method", "code"];
const INFLIGHT_LABELS: [&str; 2] = ["service", "handler"];

/// Content type of [`HttpMetrics::render`] output
pub const METRICS_CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Prometheus HTTP server metrics
///
/// Each instance owns its registry, so several apps (or tests) in one
/// process never collide on metric names.
#[derive(Clone)]
pub struct HttpMetrics {
    service: String,
    registry: Registry,
    request_duration: HistogramVec,
    response_size: HistogramVec,
    requests_inflight: IntGaugeVec,
}

impl HttpMetrics {
    /// Registers `<prefix>_http_request_duration_seconds`,
    /// `<prefix>_http_response_size_bytes` and `<prefix>_http_requests_inflight`.
    pub fn new(service: impl Into<String>, prefix: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "request_duration_seconds",
                "The latency of the HTTP requests.",
            )
            .namespace(prefix)
            .subsystem(SUBSYSTEM)
            .buckets(DEFAULT_BUCKETS.to_vec()),
            &REQUEST_LABELS,
        )?;

        let response_size = HistogramVec::new(
            HistogramOpts::new("response_size_bytes", "The size of the HTTP responses.")
                .namespace(prefix)
                .subsystem(SUBSYSTEM)
                .buckets(exponential_buckets(100.0, 10.0, 8)?),
            &REQUEST_LABELS,
        )?;

        let requests_inflight = IntGaugeVec::new(
            Opts::new(
                "requests_inflight",
                "The number of inflight requests being handled at the same time.",
            )
            .namespace(prefix)
            .subsystem(SUBSYSTEM),
            &INFLIGHT_LABELS,
        )?;

        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(response_size.clone()))?;
        registry.register(Box::new(requests_inflight.clone()))?;

        Ok(Self {
            service: service.into(),
            registry,
            request_duration,
            response_size,
            requests_inflight,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    fn start(&self, handler: &str) -> InflightGuard {
        let gauge = self
            .requests_inflight
            .with_label_values(&[self.service.as_str(), handler]);
        gauge.inc();
        InflightGuard(gauge)
    }

    fn observe(&self, handler: &str, method: &str, response: &Response, seconds: f64) {
        let code = response.status().as_u16().to_string();
        let labels = [self.service.as_str(), handler, method, code.as_str()];

        self.request_duration
            .with_label_values(&labels)
            .observe(seconds);
        self.response_size
            .with_label_values(&labels)
            .observe(response_size(response) as f64);
    }
}

impl std::fmt::Debug for HttpMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMetrics")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

/// Decrements the in-flight gauge even when the request future is dropped.
struct InflightGuard(IntGauge);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// HTTP metrics middleware for `axum::middleware::from_fn_with_state`
///
/// The `handler` label is the matched route template when routing has
/// happened, otherwise the raw path. Place it outside the load shedding
/// layer to also record shed requests.
pub async fn http_metrics_middleware(
    State(metrics): State<Arc<HttpMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let handler = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let _inflight = metrics.start(&handler);
    let response = next.run(request).await;
    metrics.observe(&handler, &method, &response, start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{LoadShedGate, LoadShedLayer};
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use loadshed_core::SharedUtilization;
    use tower::ServiceExt;

    fn sample<'a>(text: &'a str, name: &str, labels: &[&str]) -> Option<&'a str> {
        text.lines().find(|line| {
            line.starts_with(&format!("{name}{{"))
                && labels.iter().all(|label| line.contains(label))
        })
    }

    fn app(metrics: Arc<HttpMetrics>, utilization: u32) -> Router {
        let shared = SharedUtilization::new();
        shared.publish(utilization);
        let gate = Arc::new(LoadShedGate::new(60, shared));

        Router::new()
            .route("/items/{id}", get(|| async { "item" }))
            .layer(LoadShedLayer::new(gate))
            .layer(middleware::from_fn_with_state(
                metrics,
                http_metrics_middleware,
            ))
    }

    async fn send(app: Router, uri: &str) -> StatusCode {
        app.oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn test_inflight_gauge_tracks_open_requests() {
        let metrics = HttpMetrics::new("svc", "edge").unwrap();
        let guard = metrics.start("/");

        let text = metrics.render().unwrap();
        let open = sample(&text, "edge_http_requests_inflight", &[r#"handler="/""#])
            .expect("inflight sample");
        assert!(open.ends_with(" 1"), "{open}");

        drop(guard);
        let text = metrics.render().unwrap();
        let closed = sample(&text, "edge_http_requests_inflight", &[r#"handler="/""#])
            .expect("inflight sample");
        assert!(closed.ends_with(" 0"), "{closed}");
    }

    #[test]
    fn test_invalid_prefix_is_an_error() {
        assert!(HttpMetrics::new("svc", "not-valid").is_err());
    }

    #[tokio::test]
    async fn test_records_admitted_request_by_route_template() {
        let metrics = Arc::new(HttpMetrics::new("svc", "loadshed").unwrap());
        let status = send(app(metrics.clone(), 10), "/items/7").await;
        assert_eq!(status, StatusCode::OK);

        let text = metrics.render().unwrap();
        let labels = [
            r#"service="svc""#,
            r#"handler="/items/{id}""#,
            r#"method="GET""#,
            r#"code="200""#,
        ];
        let count = sample(&text, "loadshed_http_request_duration_seconds_count", &labels)
            .expect("duration sample");
        assert!(count.ends_with(" 1"), "{count}");

        let size_sum = sample(&text, "loadshed_http_response_size_bytes_sum", &labels)
            .expect("size sample");
        assert!(size_sum.ends_with(" 4"), "{size_sum}");

        let inflight = sample(
            &text,
            "loadshed_http_requests_inflight",
            &[r#"handler="/items/{id}""#],
        )
        .expect("inflight sample");
        assert!(inflight.ends_with(" 0"), "{inflight}");
    }

    #[tokio::test]
    async fn test_records_shed_requests() {
        let metrics = Arc::new(HttpMetrics::new("svc", "loadshed").unwrap());
        let status = send(app(metrics.clone(), 68), "/items/7").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        let text = metrics.render().unwrap();
        let count = sample(
            &text,
            "loadshed_http_request_duration_seconds_count",
            &[r#"code="429""#],
        )
        .expect("shed sample");
        assert!(count.ends_with(" 1"), "{count}");
    }

    #[tokio::test]
    async fn test_unrouted_request_uses_raw_path() {
        let metrics = Arc::new(HttpMetrics::new("svc", "loadshed").unwrap());
        let status = send(app(metrics.clone(), 10), "/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let text = metrics.render().unwrap();
        assert!(sample(
            &text,
            "loadshed_http_request_duration_seconds_count",
            &[r#"handler="/missing""#, r#"code="404""#],
        )
        .is_some());
    }
}
