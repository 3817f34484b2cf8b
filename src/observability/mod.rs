//! Observability.
//!
//! # Data Flow
//! ```text
//! access_log middleware → tracing event (target gateway::access) ┐
//! every other subsystem → tracing events                         ┴→ logging.rs sinks
//! ```

pub mod logging;

pub use logging::{LogSinks, ACCESS_TARGET};
