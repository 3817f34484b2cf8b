//! Health and status reporting.
//!
//! # Data Flow
//! ```text
//! every request → count layer → state.rs (per-instance counters)
//! GET <health path> → probes.rs → {"status", "time", "uptime"}
//! GET <status path> → probes.rs → process memory + runtime + request count
//! ```

pub mod probes;
pub mod state;

pub use probes::{health_route, status_route, HealthReport, StatusReport};
pub use state::ServerStats;
