use crate::error::ErrorResponse;
use axum::{
    extract::{Request, State},
    http::{self, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use futures::future::{ready, Either, Ready};
use loadshed_core::SharedUtilization;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Shed { utilization: u32 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

/// CPU utilization admission gate
///
/// Reads the value published by a `UtilizationSampler` and sheds requests
/// while it is at or above `limit`. A limit above 100 never sheds. Several
/// gates with different limits may observe the same `SharedUtilization`.
#[derive(Debug)]
pub struct LoadShedGate {
    limit: u32,
    utilization: SharedUtilization,
    retry_after: Option<Duration>,
    admitted: AtomicU64,
    shed: AtomicU64,
}

impl LoadShedGate {
    pub fn new(limit: u32, utilization: SharedUtilization) -> Self {
        Self {
            limit,
            utilization,
            retry_after: None,
            admitted: AtomicU64::new(0),
            shed: AtomicU64::new(0),
        }
    }

    /// Advertise `Retry-After` on rejections, normally the sampler refresh
    /// interval since the next value cannot arrive sooner.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn utilization(&self) -> u32 {
        self.utilization.load()
    }

    pub fn admitted_count(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn shed_count(&self) -> u64 {
        self.shed.load(Ordering::Relaxed)
    }

    /// Single wait-free read of the shared utilization; admits iff it is
    /// strictly below the limit.
    pub fn admit(&self) -> Admission {
        let utilization = self.utilization.load();
        if utilization >= self.limit {
            self.shed.fetch_add(1, Ordering::Relaxed);
            Admission::Shed { utilization }
        } else {
            self.admitted.fetch_add(1, Ordering::Relaxed);
            Admission::Admit
        }
    }

    /// `429 Too Many Requests` response sent in place of the wrapped handler.
    pub fn rejection(&self) -> Response {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::new("Too Many Requests").with_type("load_shed")),
        )
            .into_response();

        if let Some(retry_after) = self.retry_after {
            let seconds = retry_after.as_secs().max(1);
            if let Ok(header_value) = HeaderValue::from_str(&seconds.to_string()) {
                response
                    .headers_mut()
                    .insert(http::header::RETRY_AFTER, header_value);
            }
        }

        response
    }
}

/// Tower layer wrapping a service with a [`LoadShedGate`]
#[derive(Clone, Debug)]
pub struct LoadShedLayer {
    gate: Arc<LoadShedGate>,
}

impl LoadShedLayer {
    pub fn new(gate: Arc<LoadShedGate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShed<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShed {
            inner,
            gate: self.gate.clone(),
        }
    }
}

/// Service produced by [`LoadShedLayer`]
///
/// Shed requests never reach `inner`; admitted requests get `inner`'s
/// response untouched.
#[derive(Clone, Debug)]
pub struct LoadShed<S> {
    inner: S,
    gate: Arc<LoadShedGate>,
}

impl<S, B> Service<http::Request<B>> for LoadShed<S>
where
    S: Service<http::Request<B>, Response = Response>,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Either<Ready<Result<Response, S::Error>>, S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        match self.gate.admit() {
            Admission::Admit => Either::Right(self.inner.call(request)),
            Admission::Shed { .. } => Either::Left(ready(Ok(self.gate.rejection()))),
        }
    }
}

/// Load shedding middleware for `axum::middleware::from_fn_with_state`
///
/// # Errors
/// Returns `429 Too Many Requests` without running `next` while CPU
/// utilization is at or above the gate limit.
pub async fn load_shedding_middleware(
    State(gate): State<Arc<LoadShedGate>>,
    request: Request,
    next: Next,
) -> Response {
    match gate.admit() {
        Admission::Admit => next.run(request).await,
        Admission::Shed { .. } => gate.rejection(),
    }
}
