//! Demo HTTP server putting the CPU load shedding gate in front of a small
//! set of routes.

pub mod handlers;
pub mod setup;
pub mod state;
