//! HTTP front door.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (listener, graceful shutdown)
//!     → middleware/ (registered chain, last registered outermost)
//!     → request counter
//!     → mux (path handlers, backend routes)
//! ```
//!
//! builder.rs collects the options; server.rs owns the lifecycle.

pub mod builder;
pub mod middleware;
pub mod server;

pub use builder::{GatewayBuilder, GatewayOptions};
pub use server::{Composed, Gateway, GatewayState};
