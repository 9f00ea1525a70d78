//! Loadshed Infrastructure Library
//!
//! This crate wires the core counter and utilization types into running
//! infrastructure:
//! - Background utilization sampler
//! - Load shedding gate (tower layer and axum middleware)
//! - Peer middleware (request ID, request logging, HTTP metrics)
//! - Telemetry initialization
//! - Error responses

#[cfg(feature = "middleware")]
pub mod middleware;

#[cfg(feature = "sampler")]
pub mod sampler;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod error;

// Re-export commonly used types
#[cfg(feature = "middleware")]
pub use middleware::{
    get_request_id, load_shedding_middleware, request_id_middleware, request_log_middleware,
    Admission, LoadShed, LoadShedGate, LoadShedLayer, RequestId,
};

#[cfg(feature = "http-metrics")]
pub use middleware::{http_metrics_middleware, HttpMetrics, METRICS_CONTENT_TYPE};

#[cfg(feature = "sampler")]
pub use sampler::{SamplerHandle, SamplerStats, TickOutcome, UtilizationSampler};

#[cfg(feature = "observability-basic")]
pub use telemetry::init_telemetry;

pub use error::ErrorResponse;
