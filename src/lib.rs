//! Configurable HTTP front door for an RPC transcoding gateway.
//!
//! ```text
//!   client ──▶ [ middleware chain ] ──▶ request counter ──▶ mux ──▶ backend endpoints
//!              CORS, Common Log,                           │
//!              gzip / br / deflate                         ├─ path handlers (health, status)
//!                                                          ├─ metadata rules (request / response)
//!                                                          └─ per-code error renderers
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod mux;
pub mod net;
pub mod observability;

pub use config::GatewayConfig;
pub use error::{BoxError, GatewayError, GatewayResult};
pub use http::{Gateway, GatewayBuilder, GatewayState};
pub use lifecycle::Shutdown;
