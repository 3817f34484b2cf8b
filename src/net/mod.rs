//! Network plumbing.
//!
//! # Data Flow
//! ```text
//! ServerInfo (host, port)
//!     → address.rs (IP literal + port range check)
//!     → SocketAddr handed to the listener / "host:port" handed to endpoints
//!
//! ServerTls (cert, key)
//!     → tls.rs (RustlsConfig for the listener)
//!     → tls.rs (TransportCredentials for backend dials)
//! ```

pub mod address;
pub mod tls;

pub use address::{AddressError, ServerInfo};
pub use tls::{ServerTls, TransportCredentials};
