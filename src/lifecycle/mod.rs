//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! start:   fresh Shutdown → serve task subscribes → running
//! stop:    trigger → stop accepting → drain (bounded) → stopped
//! restart: stop (if running) → start
//! ```

pub mod shutdown;

pub use shutdown::{drain, signalled, Shutdown, DEFAULT_DRAIN_TIMEOUT};
