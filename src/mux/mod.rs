//! The transcoding mux.
//!
//! # Data Flow
//! ```text
//! HTTP request (after the middleware chain)
//!     → route match (method + path template)
//!     ├─ path handler ──────────────→ Response            (health, status, ...)
//!     └─ backend route
//!          → metadata.rs   request rules  → Metadata for the backend call
//!          → RpcHandler (endpoint-provided backend call)
//!          ├─ Ok(Reply)  → marshal.rs → grpc-metadata-* headers → response rules
//!          └─ Err(error) → error_handler.rs → Response
//! ```
//!
//! Routes are registered by endpoint registrants (see [`endpoint`]) and by
//! path handlers configured on the gateway. Registration is checked up
//! front so that a bad route fails `start` instead of panicking the router.

pub mod endpoint;
pub mod error_handler;
pub mod marshal;
pub mod metadata;
pub mod status;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{rejection::PathRejection, Path, Request},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::Response,
    routing::{MethodFilter, MethodRouter},
    Router,
};
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::{BoxError, GatewayError};
use crate::health::state::ServerStats;

pub use endpoint::{DialOptions, Endpoint, EndpointContext};
pub use error_handler::{ErrorPolicy, ErrorRenderer, ErrorResponder, FALLBACK_BODY};
pub use marshal::{JsonMarshaler, Marshaler};
pub use metadata::{Direction, KeyPattern, MetaAction, Metadata, MetadataPolicy, MetadataRules};
pub use status::{Code, Status};

/// Largest request body read for a backend call.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// A request as seen by a backend call.
#[derive(Debug)]
pub struct RpcRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Captures from the route template.
    pub params: HashMap<String, String>,
    /// Metadata selected by the request-direction rules.
    pub metadata: Metadata,
    pub body: Bytes,
}

impl RpcRequest {
    /// A route capture by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Decode the body as JSON, failing with `InvalidArgument`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, Status> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Status::invalid_argument(format!("invalid request body: {e}")))
    }
}

/// A successful backend response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    message: Value,
    metadata: Metadata,
}

impl Reply {
    /// Reply with no response metadata.
    pub fn new(message: Value) -> Self {
        Self {
            message,
            metadata: Metadata::default(),
        }
    }

    /// Attach response metadata, emitted as `grpc-metadata-<key>` headers.
    pub fn with_metadata(mut self, key: &str, values: Vec<String>) -> Self {
        self.metadata.set(key, values);
        self
    }

    /// The reply body before marshalling.
    pub fn message(&self) -> &Value {
        &self.message
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// A backend call behind a route.
pub trait RpcHandler: Send + Sync + 'static {
    fn call(&self, request: RpcRequest) -> BoxFuture<'static, Result<Reply, BoxError>>;
}

impl<F, Fut> RpcHandler for F
where
    F: Fn(RpcRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, BoxError>> + Send + 'static,
{
    fn call(&self, request: RpcRequest) -> BoxFuture<'static, Result<Reply, BoxError>> {
        Box::pin(self(request))
    }
}

/// A request as seen by a path handler.
#[derive(Debug)]
pub struct PathRequest {
    pub request: Request,
    pub params: HashMap<String, String>,
    /// Counters of the server instance serving this request.
    pub server: Arc<ServerStats>,
}

/// A handler registered directly on the mux, bypassing transcoding.
pub trait PathHandler: Send + Sync + 'static {
    fn call(&self, request: PathRequest) -> BoxFuture<'static, Response>;
}

impl<F, Fut> PathHandler for F
where
    F: Fn(PathRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: PathRequest) -> BoxFuture<'static, Response> {
        Box::pin(self(request))
    }
}

/// Method + path + handler triple.
#[derive(Clone)]
pub struct PathRoute {
    pub method: Method,
    pub path: String,
    pub handler: Arc<dyn PathHandler>,
}

impl std::fmt::Debug for PathRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathRoute")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}

/// Hooks configured on the mux at construction.
#[derive(Clone)]
pub struct MuxOptions {
    pub metadata: Option<MetadataPolicy>,
    pub errors: ErrorPolicy,
    pub marshaler: Arc<dyn Marshaler>,
    pub max_body_bytes: usize,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            metadata: None,
            errors: ErrorPolicy::default(),
            marshaler: Arc::new(JsonMarshaler),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

struct MuxHooks {
    metadata: Option<MetadataPolicy>,
    errors: ErrorResponder,
    marshaler: Arc<dyn Marshaler>,
    max_body_bytes: usize,
}

impl MuxHooks {
    async fn dispatch(
        &self,
        handler: &dyn RpcHandler,
        params: HashMap<String, String>,
        request: Request,
    ) -> Response {
        let (parts, body) = request.into_parts();

        let metadata = self
            .metadata
            .as_ref()
            .map(|policy| policy.incoming(&parts.headers))
            .unwrap_or_default();

        let body = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(err) => {
                let status = Status::invalid_argument(format!("failed to read request body: {err}"));
                return self.errors.handle(&parts, Box::new(status));
            }
        };

        let rpc = RpcRequest {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            params,
            metadata,
            body,
        };

        match handler.call(rpc).await {
            Ok(reply) => match self.render_reply(&reply) {
                Ok(response) => response,
                Err(err) => self.errors.handle(&parts, err),
            },
            Err(err) => self.errors.handle(&parts, err),
        }
    }

    fn render_reply(&self, reply: &Reply) -> Result<Response, BoxError> {
        let buf = self
            .marshaler
            .marshal(&reply.message)
            .map_err(|e| Status::internal(format!("failed to marshal response: {e}")))?;

        let mut response = Response::new(Body::from(buf));
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        if let Ok(content_type) = HeaderValue::from_str(self.marshaler.content_type()) {
            headers.insert(header::CONTENT_TYPE, content_type);
        }

        for (key, values) in reply.metadata.iter() {
            let name = format!("{}{}", metadata::RESPONSE_METADATA_PREFIX, key);
            let Ok(name) = HeaderName::try_from(name) else {
                tracing::warn!(key, "Dropping response metadata with invalid key");
                continue;
            };
            for value in values {
                match HeaderValue::from_str(value) {
                    Ok(value) => {
                        headers.append(name.clone(), value);
                    }
                    Err(_) => tracing::warn!(key, "Dropping response metadata with invalid value"),
                }
            }
        }

        if let Some(policy) = &self.metadata {
            policy.outgoing(headers);
        }

        Ok(response)
    }
}

/// Routes for the gateway, with the metadata and error hooks applied to backend routes.
pub struct ServeMux {
    routes: BTreeMap<String, MethodRouter>,
    registered: HashSet<(Method, String)>,
    /// Mirrors the router's path table so conflicts surface at registration.
    templates: matchit::Router<()>,
    hooks: Arc<MuxHooks>,
    stats: Arc<ServerStats>,
}

impl ServeMux {
    /// Empty mux; `stats` is handed to path handlers.
    pub fn new(options: MuxOptions, stats: Arc<ServerStats>) -> Self {
        let errors = ErrorResponder::new(options.errors, Arc::clone(&options.marshaler));
        Self {
            routes: BTreeMap::new(),
            registered: HashSet::new(),
            templates: matchit::Router::new(),
            hooks: Arc::new(MuxHooks {
                metadata: options.metadata,
                errors,
                marshaler: options.marshaler,
                max_body_bytes: options.max_body_bytes,
            }),
            stats,
        }
    }

    /// Register a backend-backed route.
    pub fn handle<H: RpcHandler>(
        &mut self,
        method: Method,
        path: &str,
        handler: H,
    ) -> Result<(), GatewayError> {
        let filter = self.reserve(&method, path)?;
        let hooks = Arc::clone(&self.hooks);
        let handler: Arc<dyn RpcHandler> = Arc::new(handler);

        let route = move |params: Result<Path<HashMap<String, String>>, PathRejection>,
                          request: Request| {
            let hooks = Arc::clone(&hooks);
            let handler = Arc::clone(&handler);
            async move {
                let params = params.map(|Path(p)| p).unwrap_or_default();
                hooks.dispatch(handler.as_ref(), params, request).await
            }
        };

        self.insert(path, filter, route);
        Ok(())
    }

    /// Register a handler that bypasses transcoding.
    pub fn handle_path(&mut self, route: &PathRoute) -> Result<(), GatewayError> {
        let filter = self.reserve(&route.method, &route.path)?;
        let stats = Arc::clone(&self.stats);
        let handler = Arc::clone(&route.handler);

        let route_fn = move |params: Result<Path<HashMap<String, String>>, PathRejection>,
                             request: Request| {
            let server = Arc::clone(&stats);
            let handler = Arc::clone(&handler);
            async move {
                let params = params.map(|Path(p)| p).unwrap_or_default();
                handler
                    .call(PathRequest {
                        request,
                        params,
                        server,
                    })
                    .await
            }
        };

        self.insert(&route.path, filter, route_fn);
        Ok(())
    }

    /// Render `err` the way a failed backend call on this mux would be.
    pub fn render_error(&self, parts: &Parts, err: BoxError) -> Response {
        self.hooks.errors.handle(parts, err)
    }

    /// Number of registered (method, path) pairs.
    pub fn route_count(&self) -> usize {
        self.registered.len()
    }

    /// Fold the registered routes into an axum router.
    pub fn into_router(self) -> Router {
        self.routes
            .into_iter()
            .fold(Router::new(), |router, (path, methods)| router.route(&path, methods))
    }

    fn reserve(&mut self, method: &Method, path: &str) -> Result<MethodFilter, GatewayError> {
        let route_error = |reason: String| GatewayError::Route {
            method: method.to_string(),
            path: path.to_string(),
            reason,
        };

        validate_path(path).map_err(route_error)?;
        let filter = MethodFilter::try_from(method.clone())
            .map_err(|_| route_error("unsupported method".to_string()))?;

        let key = (method.clone(), path.to_string());
        if self.registered.contains(&key) {
            return Err(route_error("route already registered".to_string()));
        }
        // A new template must coexist with every path already in the table.
        if !self.routes.contains_key(path) {
            self.templates
                .insert(path, ())
                .map_err(|err| route_error(err.to_string()))?;
        }
        self.registered.insert(key);

        Ok(filter)
    }

    fn insert<H, T>(&mut self, path: &str, filter: MethodFilter, handler: H)
    where
        H: axum::handler::Handler<T, ()>,
        T: 'static,
    {
        let slot = self.routes.entry(path.to_string()).or_default();
        *slot = std::mem::take(slot).on(filter, handler);
    }
}

/// Reject paths the router would panic on.
fn validate_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err("path must start with '/'".to_string());
    }

    let segments: Vec<&str> = path.split('/').skip(1).collect();
    for (i, segment) in segments.iter().enumerate() {
        if segment.starts_with("{*") && i + 1 != segments.len() {
            return Err(format!("catch-all '{segment}' must be the last segment"));
        }
        if segment.starts_with(':') || segment.starts_with('*') {
            return Err(format!("unsupported capture syntax in segment '{segment}'"));
        }
        if segment.contains('{') || segment.contains('}') {
            let name = segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .map(|s| s.strip_prefix('*').unwrap_or(s));
            match name {
                Some(name) if !name.is_empty() && !name.contains(['{', '}']) => {}
                _ => return Err(format!("invalid capture in segment '{segment}'")),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tower::ServiceExt;

    fn mux(options: MuxOptions) -> ServeMux {
        ServeMux::new(options, Arc::new(ServerStats::new()))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn path_validation() {
        assert!(validate_path("/v1/users/{id}").is_ok());
        assert!(validate_path("/files/{*rest}").is_ok());
        assert!(validate_path("/").is_ok());
        assert!(validate_path("v1/users").is_err());
        assert!(validate_path("/v1/users/:id").is_err());
        assert!(validate_path("/v1/users/{}").is_err());
        assert!(validate_path("/v1/users/{id").is_err());
        assert!(validate_path("/files/{*rest}/meta").is_err());
    }

    #[test]
    fn duplicate_route_fails_closed() {
        let mut mux = mux(MuxOptions::default());
        let echo = |_: RpcRequest| async { Ok::<_, BoxError>(Reply::new(json!({}))) };

        mux.handle(Method::GET, "/v1/echo", echo).unwrap();
        mux.handle(Method::POST, "/v1/echo", echo).unwrap();
        let err = mux.handle(Method::GET, "/v1/echo", echo).unwrap_err();

        assert!(matches!(err, GatewayError::Route { .. }));
        assert_eq!(mux.route_count(), 2);
    }

    #[test]
    fn conflicting_capture_names_fail_closed() {
        let mut mux = mux(MuxOptions::default());
        let echo = |_: RpcRequest| async { Ok::<_, BoxError>(Reply::new(json!({}))) };

        mux.handle(Method::GET, "/v1/users/{id}", echo).unwrap();
        mux.handle(Method::DELETE, "/v1/users/{id}", echo).unwrap();
        let err = mux.handle(Method::POST, "/v1/users/{name}", echo).unwrap_err();

        match err {
            GatewayError::Route { path, reason, .. } => {
                assert_eq!(path, "/v1/users/{name}");
                assert!(reason.contains("/v1/users/{id}"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(mux.route_count(), 2);

        // The table still builds after the rejected registration.
        let _router = mux.into_router();
    }

    #[test]
    fn inner_catch_all_fails_closed() {
        let mut mux = mux(MuxOptions::default());
        let echo = |_: RpcRequest| async { Ok::<_, BoxError>(Reply::new(json!({}))) };

        let err = mux.handle(Method::GET, "/files/{*rest}/meta", echo).unwrap_err();
        assert!(matches!(err, GatewayError::Route { .. }));
        assert_eq!(mux.route_count(), 0);
    }

    #[tokio::test]
    async fn backend_route_receives_params_and_metadata() {
        let policy = MetadataPolicy::new().pass_through(["x-user"], Direction::Request);
        let mut mux = mux(MuxOptions {
            metadata: Some(policy),
            ..MuxOptions::default()
        });

        mux.handle(Method::GET, "/v1/users/{id}", |req: RpcRequest| async move {
            Ok::<_, BoxError>(Reply::new(json!({
                "id": req.param("id"),
                "user": req.metadata.get("x-user"),
                "forwarded": req.metadata.len(),
            })))
        })
        .unwrap();

        let response = mux
            .into_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/users/42")
                    .header("x-user", "alice")
                    .header("x-other", "dropped")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(
            body_json(response).await,
            json!({ "id": "42", "user": "alice", "forwarded": 1 })
        );
    }

    #[tokio::test]
    async fn backend_error_goes_through_error_hook() {
        let mut errors = ErrorPolicy::new();
        errors.insert(Code::NotFound, |_, status| {
            Some(json!({ "error": status.message(), "random": 3232 }))
        });
        let mut mux = mux(MuxOptions {
            errors,
            ..MuxOptions::default()
        });

        mux.handle(Method::GET, "/v1/missing", |_: RpcRequest| async {
            Err::<Reply, BoxError>(Box::new(Status::not_found("no such thing")))
        })
        .unwrap();

        let response = mux
            .into_router()
            .oneshot(Request::builder().uri("/v1/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "no such thing", "random": 3232 })
        );
    }

    #[tokio::test]
    async fn response_metadata_is_filtered() {
        let policy = MetadataPolicy::new()
            .pass_through(["grpc-metadata-trace-id"], Direction::Response)
            .delete(["grpc-metadata-*"], Direction::Response);
        let mut mux = mux(MuxOptions {
            metadata: Some(policy),
            ..MuxOptions::default()
        });

        mux.handle(Method::GET, "/v1/traced", |_: RpcRequest| async {
            Ok::<_, BoxError>(Reply::new(json!({}))
                .with_metadata("trace-id", vec!["abc".into()])
                .with_metadata("internal", vec!["secret".into()]))
        })
        .unwrap();

        let response = mux
            .into_router()
            .oneshot(Request::builder().uri("/v1/traced").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.headers()["grpc-metadata-trace-id"], "abc");
        assert!(!response.headers().contains_key("grpc-metadata-internal"));
    }

    #[tokio::test]
    async fn path_handler_bypasses_transcoding() {
        let mut mux = mux(MuxOptions::default());
        let route = PathRoute {
            method: Method::GET,
            path: "/ping".to_string(),
            handler: Arc::new(|req: PathRequest| async move {
                Response::new(Body::from(format!("pong {}", req.server.request_count())))
            }),
        };
        mux.handle_path(&route).unwrap();
        assert!(mux.handle_path(&route).is_err());

        let response = mux
            .into_router()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pong 0");
    }
}
