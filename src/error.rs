//! Crate-wide error type.
//!
//! Everything that can keep the gateway from reaching a serving state ends
//! up here. Per-request failures never do: they are rendered by the mux's
//! error hook or logged by the middleware that saw them.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::net::address::AddressError;

/// Boxed error used at the collaborator seams (endpoint registrants, backend handlers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which log sink a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Access,
    Error,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogKind::Access => f.write_str("access"),
            LogKind::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("failed to open {kind} log file {} for output: {source}", path.display())]
    LogOutput {
        kind: LogKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load TLS material from {}: {reason}", path.display())]
    Tls { path: PathBuf, reason: String },

    #[error("failed to register {method} {path}: {reason}")]
    Route {
        method: String,
        path: String,
        reason: String,
    },

    #[error("endpoint registration failed: {0}")]
    Endpoint(#[source] BoxError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("gateway is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
