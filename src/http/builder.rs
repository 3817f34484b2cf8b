//! Gateway configuration builder.
//!
//! Scalar options (addresses, TLS, log sinks, metadata policy, marshaler)
//! overwrite earlier values. List options (endpoints, path handlers,
//! middleware, CORS, probes) append. Error renderers overwrite per code.
//!
//! `build` opens the log sinks and freezes everything into an immutable
//! [`GatewayOptions`] shared by every start of the resulting [`Gateway`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{request::Parts, Method};
use serde_json::Value;

use crate::config::schema::GatewayConfig;
use crate::error::GatewayResult;
use crate::health::probes::{health_route, status_route};
use crate::http::middleware::{self, CorsPolicy, Middleware};
use crate::http::server::Gateway;
use crate::lifecycle::DEFAULT_DRAIN_TIMEOUT;
use crate::mux::{
    Code, Direction, Endpoint, ErrorPolicy, JsonMarshaler, Marshaler, MetaAction, MetadataPolicy,
    PathHandler, PathRoute, Status,
};
use crate::net::{ServerInfo, ServerTls};
use crate::observability::logging::{self, LogSinks};

/// Listen address used when none is configured.
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u32 = 8081;
pub const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";
pub const DEFAULT_BACKEND_PORT: u32 = 8080;

/// Frozen gateway configuration.
pub struct GatewayOptions {
    pub server: ServerInfo,
    pub backend: ServerInfo,
    pub tls: Option<ServerTls>,
    pub endpoints: Vec<Arc<dyn Endpoint>>,
    pub paths: Vec<PathRoute>,
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub metadata: Option<MetadataPolicy>,
    pub errors: ErrorPolicy,
    pub marshaler: Arc<dyn Marshaler>,
    pub sinks: LogSinks,
    pub drain_timeout: Duration,
}

impl std::fmt::Debug for GatewayOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayOptions")
            .field("server", &self.server)
            .field("backend", &self.backend)
            .field("tls", &self.tls)
            .field("endpoints", &self.endpoints.len())
            .field("paths", &self.paths)
            .field("middleware", &self.middleware.len())
            .field("metadata", &self.metadata)
            .field("errors", &self.errors)
            .field("sinks", &self.sinks)
            .finish()
    }
}

/// Collects gateway options; see the module docs for overwrite rules.
pub struct GatewayBuilder {
    pub(crate) options: GatewayOptions,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    /// Builder with the default addresses and no handlers.
    pub fn new() -> Self {
        Self {
            options: GatewayOptions {
                server: ServerInfo::new(DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT),
                backend: ServerInfo::new(DEFAULT_BACKEND_HOST, DEFAULT_BACKEND_PORT),
                tls: None,
                endpoints: Vec::new(),
                paths: Vec::new(),
                middleware: Vec::new(),
                metadata: None,
                errors: ErrorPolicy::new(),
                marshaler: Arc::new(JsonMarshaler),
                sinks: LogSinks::default(),
                drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            },
        }
    }

    /// Map a configuration file onto builder calls.
    ///
    /// CORS is registered first, then Common Log, then the compressors in
    /// file order, so the last listed compressor is the outermost.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut builder = Self::new()
            .with_server(&config.server.host, config.server.port)
            .with_backend(&config.backend.host, config.backend.port)
            .with_silent(config.logging.silent)
            .with_log_level(&config.logging.level);

        if let Some(tls) = &config.tls {
            builder = builder.with_tls(&tls.cert_path, &tls.key_path);
        }
        if let Some(path) = &config.logging.access_log {
            builder = builder.with_access_log_output(path);
        }
        if let Some(path) = &config.logging.error_log {
            builder = builder.with_error_output(path);
        }
        if let Some(cors) = &config.cors {
            builder = builder.with_cors(cors.clone());
        }
        if config.access_log {
            builder = builder.with_middleware(middleware::common_log());
        }
        for encoding in &config.compression {
            builder = builder.with_middleware(middleware::Compression(*encoding));
        }
        if let Some(path) = &config.probes.health {
            builder = builder.with_health_check(path);
        }
        if let Some(path) = &config.probes.status {
            builder = builder.with_status_check(path);
        }
        for rule in &config.metadata {
            builder = builder.with_metadata_rules(&rule.keys, rule.action, rule.direction);
        }

        builder
    }

    /// Listen address.
    pub fn with_server(mut self, host: &str, port: u32) -> Self {
        self.options.server = ServerInfo::new(host, port);
        self
    }

    /// Backend address handed to endpoint registrants.
    pub fn with_backend(mut self, host: &str, port: u32) -> Self {
        self.options.backend = ServerInfo::new(host, port);
        self
    }

    /// Serve TLS with this certificate and key; the certificate also roots backend dials.
    pub fn with_tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.options.tls = Some(ServerTls::new(cert, key));
        self
    }

    /// Suppress console echo of both log sinks.
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.options.sinks.silent = silent;
        self
    }

    /// Append access lines to `path`.
    pub fn with_access_log_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.sinks.access_path = Some(path.into());
        self
    }

    /// Append diagnostic lines to `path`.
    pub fn with_error_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.sinks.error_path = Some(path.into());
        self
    }

    /// Diagnostic filter used when `RUST_LOG` is unset.
    pub fn with_log_level(mut self, level: &str) -> Self {
        self.options.sinks.level = level.to_string();
        self
    }

    /// Add a registrant that puts backend routes on the mux at start.
    pub fn with_endpoint<E: Endpoint + 'static>(mut self, endpoint: E) -> Self {
        self.options.endpoints.push(Arc::new(endpoint));
        self
    }

    /// Serve `method path` with `handler`, bypassing transcoding.
    pub fn with_path_handler<H: PathHandler>(mut self, method: Method, path: &str, handler: H) -> Self {
        self.options.paths.push(PathRoute {
            method,
            path: path.to_string(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Append to the middleware chain. The last one registered is outermost.
    pub fn with_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.options.middleware.push(Arc::new(middleware));
        self
    }

    /// Append a CORS policy to the middleware chain.
    pub fn with_cors(self, policy: CorsPolicy) -> Self {
        self.with_middleware(policy)
    }

    /// Serve the health probe at `path`.
    pub fn with_health_check(mut self, path: &str) -> Self {
        self.options.paths.push(health_route(path));
        self
    }

    /// Serve the status probe at `path`.
    pub fn with_status_check(mut self, path: &str) -> Self {
        self.options.paths.push(status_route(path));
        self
    }

    /// Replace the metadata policy.
    pub fn with_metadata(mut self, policy: MetadataPolicy) -> Self {
        self.options.metadata = Some(policy);
        self
    }

    /// Append rules to the metadata policy.
    pub fn with_metadata_rules<I, S>(mut self, keys: I, action: MetaAction, direction: Direction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let policy = self.options.metadata.take().unwrap_or_default();
        self.options.metadata = Some(policy.rules(keys, action, direction));
        self
    }

    /// Forward keys matching any of `keys`.
    pub fn with_pass_through_metadata<I, S>(self, keys: I, direction: Direction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_metadata_rules(keys, MetaAction::PassThrough, direction)
    }

    /// Drop keys matching any of `keys`.
    pub fn with_delete_metadata<I, S>(self, keys: I, direction: Direction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_metadata_rules(keys, MetaAction::Delete, direction)
    }

    /// Render errors carrying `code` with `renderer`; returning `None` falls back to the default.
    pub fn with_error_handler<F>(mut self, code: Code, renderer: F) -> Self
    where
        F: Fn(&Parts, &Status) -> Option<Value> + Send + Sync + 'static,
    {
        self.options.errors.insert(code, renderer);
        self
    }

    /// Replace the JSON marshaler used for replies and error bodies.
    pub fn with_marshaler<M: Marshaler + 'static>(mut self, marshaler: M) -> Self {
        self.options.marshaler = Arc::new(marshaler);
        self
    }

    /// How long `stop` waits for in-flight requests.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.options.drain_timeout = timeout;
        self
    }

    /// Options collected so far.
    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Open the log sinks and freeze the configuration.
    ///
    /// The gateway logs to its own sinks whether or not it also became the
    /// process-wide default.
    pub fn build(self) -> GatewayResult<Gateway> {
        let dispatch = logging::dispatch(&self.options.sinks)?;
        if !logging::install_global(&dispatch) {
            tracing::dispatcher::with_default(&dispatch, || {
                tracing::debug!("Process subscriber already installed, gateway keeps its own sinks");
            });
        }
        Ok(Gateway::new(self.options, dispatch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_addresses() {
        let builder = GatewayBuilder::new();
        assert_eq!(builder.options().server.to_string(), "0.0.0.0:8081");
        assert_eq!(builder.options().backend.to_string(), "127.0.0.1:8080");
        assert!(builder.options().tls.is_none());
    }

    #[test]
    fn scalars_overwrite_lists_append() {
        let builder = GatewayBuilder::new()
            .with_server("127.0.0.1", 9000)
            .with_server("127.0.0.1", 9001)
            .with_tls("a.pem", "a.key")
            .with_tls("b.pem", "b.key")
            .with_middleware(middleware::gzip())
            .with_middleware(middleware::brotli())
            .with_health_check("/health")
            .with_status_check("/status");

        let options = builder.options();
        assert_eq!(options.server.port, 9001);
        assert_eq!(options.tls.as_ref().unwrap().cert_path, PathBuf::from("b.pem"));
        assert_eq!(options.middleware.len(), 2);
        assert_eq!(options.paths.len(), 2);
    }

    #[test]
    fn metadata_rules_accumulate() {
        let builder = GatewayBuilder::new()
            .with_pass_through_metadata(["x-user"], Direction::Request)
            .with_delete_metadata(["x-secret-*"], Direction::Bidirectional);

        let policy = builder.options().metadata.as_ref().unwrap();
        assert_eq!(policy.request().len(), 2);
        assert_eq!(policy.response().len(), 1);
    }

    #[test]
    fn error_handlers_overwrite_per_code() {
        let builder = GatewayBuilder::new()
            .with_error_handler(Code::NotFound, |_, _| None)
            .with_error_handler(Code::NotFound, |_, _| None)
            .with_error_handler(Code::Internal, |_, _| None);

        assert_eq!(builder.options().errors.len(), 2);
    }
}
