//! Error types module
//!
//! Runtime anomalies (unreadable counters, malformed lines) are not errors here:
//! they degrade to a zero snapshot. Only failures that must stop the process
//! from serving are represented by `ShedError`.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ShedError {
    #[error("Counter source {path} could not be opened: {source}")]
    CounterSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not establish a counter baseline: {reason}")]
    Baseline { reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sampler error: {0}")]
    Sampler(String),
}

impl ShedError {
    /// Whether the error happened before the sampler could start.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            ShedError::CounterSource { .. } | ShedError::Baseline { .. }
        )
    }
}
