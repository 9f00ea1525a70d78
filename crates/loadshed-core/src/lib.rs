//! Loadshed Core Library
//!
//! This crate provides the building blocks shared by every loadshed component:
//! cumulative CPU counter reading, delta-based utilization math, the shared
//! utilization handle, error types and configuration.

pub mod config;
pub mod counters;
pub mod error;
pub mod utilization;

// Re-export commonly used types
pub use config::{LoadShedConfig, LogFormat};
pub use counters::{
    parse_stat_line, CounterRead, CounterSnapshot, CounterSource, DegradedReason, ProcStatSource,
};
pub use error::ShedError;
pub use utilization::{compute_utilization, SharedUtilization};
