//! Background CPU utilization sampling
//!
//! This module keeps a [`loadshed_core::SharedUtilization`] up to date from a
//! [`loadshed_core::CounterSource`] on a fixed refresh interval.

pub use monitor::{SamplerHandle, SamplerStats, TickOutcome, UtilizationSampler};

mod monitor;
