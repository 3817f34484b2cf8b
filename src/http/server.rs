//! Gateway lifecycle.
//!
//! # Responsibilities
//! - Build the mux, path handlers and backend endpoints for each start
//! - Compose the middleware chain around the mux
//! - Bind plain TCP (axum) or TLS (axum-server + rustls) listeners
//! - Stop with a bounded graceful drain; restart with the same options
//!
//! # Data Flow
//! ```text
//! start:
//!     validate listen address
//!     → ServerStats + Shutdown (fresh per start)
//!     → mux ← path handlers
//!     → TLS credentials (listener config + backend roots)
//!     → validate backend address → endpoints register on mux
//!     → compose: count → mux, then middleware in registration order,
//!       then the gateway's log dispatcher outermost
//!     → bind + spawn serve task (under the same dispatcher)
//! stop:
//!     Shutdown::trigger → graceful shutdown → drain (bounded)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::Dispatch;

use crate::error::{GatewayError, GatewayResult};
use crate::health::state::ServerStats;
use crate::http::builder::{GatewayBuilder, GatewayOptions};
use crate::http::middleware;
use crate::lifecycle::{drain, signalled, Shutdown};
use crate::mux::{DialOptions, EndpointContext, MuxOptions, ServeMux};
use crate::net::tls::{load_client_credentials, load_tls_config};
use crate::net::TransportCredentials;

/// Where a gateway is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    /// Built, never started.
    Configured,
    Running,
    Stopped,
}

struct Running {
    addr: SocketAddr,
    shutdown: Arc<Shutdown>,
    task: JoinHandle<std::io::Result<()>>,
}

/// A handler chain ready to be served.
pub struct Composed {
    pub router: Router,
    pub stats: Arc<ServerStats>,
    pub shutdown: Arc<Shutdown>,
    tls: Option<RustlsConfig>,
}

/// The gateway server: frozen options plus the current serving instance.
pub struct Gateway {
    options: Arc<GatewayOptions>,
    /// Subscriber writing to this gateway's sinks.
    dispatch: Dispatch,
    running: Option<Running>,
    started: bool,
}

impl Gateway {
    /// Shorthand for [`GatewayBuilder::new`].
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub(crate) fn new(options: GatewayOptions, dispatch: Dispatch) -> Self {
        Self {
            options: Arc::new(options),
            dispatch,
            running: None,
            started: false,
        }
    }

    /// Options frozen at build.
    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// The subscriber this gateway logs through.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Current lifecycle state.
    pub fn state(&self) -> GatewayState {
        match (&self.running, self.started) {
            (Some(_), _) => GatewayState::Running,
            (None, true) => GatewayState::Stopped,
            (None, false) => GatewayState::Configured,
        }
    }

    /// Address of the live listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Start serving. Returns the bound address.
    pub async fn start(&mut self) -> GatewayResult<SocketAddr> {
        let dispatch = self.dispatch.clone();
        self.start_scoped().with_subscriber(dispatch).await
    }

    async fn start_scoped(&mut self) -> GatewayResult<SocketAddr> {
        if let Some(running) = &self.running {
            return Err(GatewayError::AlreadyRunning(running.addr));
        }

        tracing::info!(address = %self.options.server, "Gateway server starting");

        let listen = self.options.server.validate()?;
        let composed = self.compose().await?;

        let rx = composed.shutdown.subscribe();
        let app = composed
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        let (addr, task) = match composed.tls {
            None => {
                let listener = TcpListener::bind(listen)
                    .await
                    .map_err(|source| GatewayError::Bind { addr: listen, source })?;
                let addr = listener.local_addr()?;
                let serve = axum::serve(listener, app).with_graceful_shutdown(signalled(rx));
                let task = tokio::spawn(
                    async move { serve.await }.with_subscriber(self.dispatch.clone()),
                );
                (addr, task)
            }
            Some(config) => {
                let handle = axum_server::Handle::new();
                let server = axum_server::bind_rustls(listen, config).handle(handle.clone());
                let mut task = tokio::spawn(
                    async move { server.serve(app).await }.with_subscriber(self.dispatch.clone()),
                );

                let addr = match handle.listening().await {
                    Some(addr) => addr,
                    None => {
                        let source = match (&mut task).await {
                            Ok(Err(err)) => err,
                            Ok(Ok(())) => std::io::Error::other("listener closed before binding"),
                            Err(err) => std::io::Error::other(err),
                        };
                        return Err(GatewayError::Bind { addr: listen, source });
                    }
                };

                let drain_timeout = self.options.drain_timeout;
                tokio::spawn(async move {
                    signalled(rx).await;
                    handle.graceful_shutdown(Some(drain_timeout));
                });
                (addr, task)
            }
        };

        tracing::info!(
            address = %addr,
            tls = self.options.tls.is_some(),
            routes = self.options.paths.len(),
            middleware = self.options.middleware.len(),
            "Gateway listening"
        );

        self.running = Some(Running {
            addr,
            shutdown: composed.shutdown,
            task,
        });
        self.started = true;
        Ok(addr)
    }

    /// Stop serving. Stopping an idle gateway only logs.
    pub async fn stop(&mut self) -> &mut Self {
        let dispatch = self.dispatch.clone();
        self.stop_scoped().with_subscriber(dispatch).await;
        self
    }

    async fn stop_scoped(&mut self) {
        let Some(running) = self.running.take() else {
            tracing::info!(address = %self.options.server, "Gateway already stopped");
            return;
        };

        tracing::info!(address = %running.addr, "Gateway server stopping");
        running.shutdown.trigger();

        if let Some(Err(err)) = drain(running.task, self.options.drain_timeout).await {
            tracing::error!(address = %running.addr, error = %err, "Gateway server exited with error");
        }
    }

    /// Stop (if running) and start again with the same options.
    pub async fn restart(&mut self) -> GatewayResult<SocketAddr> {
        tracing::dispatcher::with_default(&self.dispatch, || {
            tracing::info!(address = %self.options.server, "Gateway server restarting");
        });
        if self.running.is_some() {
            self.stop().await;
        }
        self.start().await
    }

    /// Start, then serve until `signal` resolves or the server exits on its own.
    pub async fn serve_until<F>(&mut self, signal: F) -> GatewayResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;

        let exited = {
            let Some(running) = self.running.as_mut() else {
                return Ok(());
            };
            tokio::select! {
                _ = signal => None,
                result = &mut running.task => Some(result),
            }
        };

        match exited {
            None => {
                self.stop().await;
                Ok(())
            }
            Some(result) => {
                self.running = None;
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(GatewayError::Serve(err)),
                    Err(err) => Err(GatewayError::Serve(std::io::Error::other(err))),
                }
            }
        }
    }

    /// Build the complete handler chain for one server instance without binding.
    pub async fn compose(&self) -> GatewayResult<Composed> {
        let options = &self.options;
        let stats = Arc::new(ServerStats::new());
        let shutdown = Arc::new(Shutdown::new());

        let mut mux = ServeMux::new(
            MuxOptions {
                metadata: options.metadata.clone(),
                errors: options.errors.clone(),
                marshaler: Arc::clone(&options.marshaler),
                ..MuxOptions::default()
            },
            Arc::clone(&stats),
        );

        for route in &options.paths {
            mux.handle_path(route)?;
        }

        let (tls, credentials) = match &options.tls {
            Some(tls) => {
                let config = load_tls_config(tls).await?;
                let credentials = load_client_credentials(&tls.cert_path)?;
                (Some(config), credentials)
            }
            None => (None, TransportCredentials::Insecure),
        };

        let target = options.backend.validated_target()?;
        let dial = DialOptions { credentials };
        let ctx = EndpointContext::new(&target, &dial, &shutdown);
        for endpoint in &options.endpoints {
            // Route errors raised through `?` inside a registrant keep their kind.
            endpoint
                .register(&ctx, &mut mux)
                .map_err(|err| match err.downcast::<GatewayError>() {
                    Ok(err) => *err,
                    Err(err) => GatewayError::Endpoint(err),
                })?;
        }

        tracing::debug!(
            backend = %target,
            routes = mux.route_count(),
            secure = dial.credentials.is_secure(),
            "Mux ready"
        );

        let inner = middleware::count_requests(mux.into_router(), Arc::clone(&stats));
        let router = middleware::with_dispatch(
            middleware::compose(inner, &options.middleware),
            self.dispatch.clone(),
        );

        Ok(Composed {
            router,
            stats,
            shutdown,
            tls,
        })
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.trigger();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::mux::{Reply, RpcRequest, Status};
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    fn gateway(builder: GatewayBuilder) -> Gateway {
        Gateway::new(builder.options, Dispatch::none())
    }

    #[tokio::test]
    async fn invalid_listen_address_fails_start() {
        let mut gw = gateway(GatewayBuilder::new().with_server("a.b.c.d", 80));
        let err = gw.start().await.unwrap_err();
        assert!(matches!(err, GatewayError::Address(_)));
        assert_eq!(gw.state(), GatewayState::Configured);
    }

    #[tokio::test]
    async fn invalid_backend_address_fails_compose() {
        let gw = gateway(GatewayBuilder::new().with_backend("256.220.30.1", 8080));
        assert!(matches!(gw.compose().await, Err(GatewayError::Address(_))));
    }

    #[tokio::test]
    async fn endpoint_error_aborts_compose() {
        let gw = gateway(GatewayBuilder::new().with_endpoint(
            |_: &EndpointContext<'_>, _: &mut ServeMux| -> Result<(), BoxError> {
                Err("backend unreachable".into())
            },
        ));
        let err = gw.compose().await.err().unwrap();
        assert!(err.to_string().contains("backend unreachable"));
    }

    #[tokio::test]
    async fn endpoints_see_backend_target() {
        let gw = gateway(
            GatewayBuilder::new()
                .with_backend("10.1.2.3", 9090)
                .with_endpoint(|ctx: &EndpointContext<'_>, mux: &mut ServeMux| -> Result<(), BoxError> {
                    let target = ctx.target().to_string();
                    mux.handle(Method::GET, "/v1/target", move |_: RpcRequest| {
                        let target = target.clone();
                        async move { Ok::<_, BoxError>(Reply::new(json!({ "target": target }))) }
                    })?;
                    Ok(())
                }),
        );

        let composed = gw.compose().await.unwrap();
        let response = composed
            .router
            .oneshot(Request::builder().uri("/v1/target").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["target"], "10.1.2.3:9090");
    }

    #[tokio::test]
    async fn duplicate_path_handler_fails_closed() {
        let gw = gateway(
            GatewayBuilder::new()
                .with_health_check("/health")
                .with_health_check("/health"),
        );
        assert!(matches!(gw.compose().await, Err(GatewayError::Route { .. })));
    }

    #[tokio::test]
    async fn error_renderer_reaches_composed_chain() {
        let gw = gateway(
            GatewayBuilder::new()
                .with_error_handler(crate::mux::Code::PermissionDenied, |_, status| {
                    Some(json!({ "denied": status.message() }))
                })
                .with_endpoint(|_: &EndpointContext<'_>, mux: &mut ServeMux| -> Result<(), BoxError> {
                    mux.handle(Method::GET, "/v1/secret", |_: RpcRequest| async {
                        Err::<Reply, BoxError>(Box::new(Status::new(
                            crate::mux::Code::PermissionDenied,
                            "not yours",
                        )))
                    })?;
                    Ok(())
                }),
        );

        let response = gw
            .compose()
            .await
            .unwrap()
            .router
            .oneshot(Request::builder().uri("/v1/secret").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn stop_twice_is_harmless() {
        let mut gw = gateway(GatewayBuilder::new().with_server("127.0.0.1", 0));
        gw.start().await.unwrap();
        assert_eq!(gw.state(), GatewayState::Running);

        gw.stop().await.stop().await;
        assert_eq!(gw.state(), GatewayState::Stopped);
        assert!(gw.local_addr().is_none());
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let mut gw = gateway(GatewayBuilder::new().with_server("127.0.0.1", 0));
        let addr = gw.start().await.unwrap();

        let err = gw.start().await.unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyRunning(a) if a == addr));
        gw.stop().await;
    }
}
