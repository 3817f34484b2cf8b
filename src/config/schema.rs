//! Configuration schema definitions.
//!
//! Every section has defaults, so an empty file yields a gateway on
//! `0.0.0.0:8081` in front of a backend at `127.0.0.1:8080`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::http::builder::{
    DEFAULT_BACKEND_HOST, DEFAULT_BACKEND_PORT, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT,
};
use crate::http::middleware::{CorsPolicy, Encoding};
use crate::mux::{Direction, MetaAction};
use crate::net::ServerInfo;
use crate::observability::logging::DEFAULT_LOG_LEVEL;

/// Root configuration for the gateway.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen address.
    pub server: ServerInfo,

    /// Backend RPC service address.
    pub backend: ServerInfo,

    /// Certificate/key pair; enables TLS on the listener and for backend dials.
    pub tls: Option<TlsConfig>,

    pub logging: LoggingConfig,

    pub cors: Option<CorsPolicy>,

    /// Metadata rules, evaluated in file order.
    pub metadata: Vec<MetadataRuleConfig>,

    /// Compressors in registration order; the last listed one is tried first.
    pub compression: Vec<Encoding>,

    /// Register the Common Log middleware.
    pub access_log: bool,

    pub probes: ProbeConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerInfo::new(DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT),
            backend: ServerInfo::new(DEFAULT_BACKEND_HOST, DEFAULT_BACKEND_PORT),
            tls: None,
            logging: LoggingConfig::default(),
            cors: None,
            metadata: Vec::new(),
            compression: Vec::new(),
            access_log: true,
            probes: ProbeConfig::default(),
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Access log file; console only when unset.
    pub access_log: Option<PathBuf>,

    /// Diagnostic log file; console only when unset.
    pub error_log: Option<PathBuf>,

    /// Suppress console output.
    pub silent: bool,

    /// Diagnostic level or filter directive, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            access_log: None,
            error_log: None,
            silent: false,
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetadataRuleConfig {
    /// Exact keys or `*` globs.
    pub keys: Vec<String>,

    pub action: MetaAction,

    #[serde(default = "default_direction")]
    pub direction: Direction,
}

fn default_direction() -> Direction {
    Direction::Request
}

/// Paths of the built-in probes; unset means not registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub health: Option<String>,
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.server.to_string(), "0.0.0.0:8081");
        assert!(config.access_log);
    }

    #[test]
    fn full_file_parses() {
        let config: GatewayConfig = toml::from_str(
            r#"
            compression = ["gzip", "br", "deflate"]
            access_log = false

            [server]
            host = "127.0.0.1"
            port = 9000

            [tls]
            cert_path = "certs/server.pem"
            key_path = "certs/server.key"

            [logging]
            access_log = "/var/log/gateway/access.log"
            silent = true
            level = "debug"

            [cors]
            allow_credentials = true
            allowed_origins = ["*"]
            max_age = 300

            [[metadata]]
            keys = ["x-user-*", "authorization"]
            action = "pass_through"

            [[metadata]]
            keys = ["grpc-metadata-internal-*"]
            action = "delete"
            direction = "bidirectional"

            [probes]
            health = "/health"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.backend.port, 8080);
        assert_eq!(
            config.compression,
            vec![Encoding::Gzip, Encoding::Brotli, Encoding::Deflate]
        );
        assert!(!config.access_log);
        assert!(config.logging.silent);
        assert_eq!(config.cors.as_ref().unwrap().max_age, 300);
        assert_eq!(config.metadata[0].direction, Direction::Request);
        assert_eq!(config.metadata[1].action, MetaAction::Delete);
        assert_eq!(config.probes.health.as_deref(), Some("/health"));
        assert!(config.probes.status.is_none());
    }

    #[test]
    fn unknown_encoding_is_a_parse_error() {
        assert!(toml::from_str::<GatewayConfig>(r#"compression = ["zstd"]"#).is_err());
    }
}
