//! Middleware chain.
//!
//! # Data Flow
//! ```text
//! registered: [m1, m2, m3]
//!
//! request → m3 → m2 → m1 → count → mux
//! ```
//!
//! The list is applied in registration order, each entry wrapping
//! everything applied before it, so the last one registered runs first on
//! the request path and last on the response path.

pub mod access_log;
pub mod compression;
pub mod cors;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::instrument::WithSubscriber;
use tracing::Dispatch;

use crate::health::state::ServerStats;

pub use access_log::{common_log, AccessEntry, CommonLog};
pub use compression::{accepts, brotli, deflate, gzip, Compression, Encoding};
pub use cors::CorsPolicy;

/// Wraps the handler built so far.
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, router: Router) -> Router;
}

impl<F> Middleware for F
where
    F: Fn(Router) -> Router + Send + Sync + 'static,
{
    fn wrap(&self, router: Router) -> Router {
        self(router)
    }
}

/// Apply `chain` around `inner` in registration order.
pub fn compose(inner: Router, chain: &[Arc<dyn Middleware>]) -> Router {
    chain.iter().fold(inner, |router, m| m.wrap(router))
}

/// Innermost layer feeding the status probe's request counter.
pub fn count_requests(router: Router, stats: Arc<ServerStats>) -> Router {
    router.layer(middleware::from_fn_with_state(stats, count))
}

async fn count(State(stats): State<Arc<ServerStats>>, request: Request, next: Next) -> Response {
    stats.record_request();
    next.run(request).await
}

/// Outermost layer: each request runs under the owning gateway's log sinks.
pub fn with_dispatch(router: Router, dispatch: Dispatch) -> Router {
    router.layer(middleware::from_fn_with_state(dispatch, scoped))
}

async fn scoped(State(dispatch): State<Dispatch>, request: Request, next: Next) -> Response {
    next.run(request).with_subscriber(dispatch).await
}

/// Request spans on the diagnostic sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceRequests;

/// Log request spans through [`TraceLayer`].
pub fn trace_requests() -> TraceRequests {
    TraceRequests
}

impl Middleware for TraceRequests {
    fn wrap(&self, router: Router) -> Router {
        router.layer(TraceLayer::new_for_http())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{HeaderValue, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    /// Appends `name` to the `x-chain` response header on the way out.
    fn marker(name: &'static str) -> Arc<dyn Middleware> {
        Arc::new(move |router: Router| {
            router.layer(middleware::from_fn(move |request: Request, next: Next| async move {
                let mut response = next.run(request).await;
                let chain = response
                    .headers()
                    .get("x-chain")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| format!("{v},{name}"))
                    .unwrap_or_else(|| name.to_string());
                if let Ok(value) = HeaderValue::from_str(&chain) {
                    response.headers_mut().insert("x-chain", value);
                }
                response
            }))
        })
    }

    #[tokio::test]
    async fn last_registered_is_outermost() {
        let inner = Router::new().route("/", get(|| async { "ok" }));
        let chain = vec![marker("first"), marker("second"), marker("third")];

        let response = compose(inner, &chain)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        // Response path runs innermost first.
        assert_eq!(response.headers()["x-chain"], "first,second,third");
    }

    #[tokio::test]
    async fn counter_sees_every_request() {
        let stats = Arc::new(ServerStats::new());
        let app = count_requests(
            Router::new().route("/", get(|| async { "ok" })),
            Arc::clone(&stats),
        );

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(stats.request_count(), 3);
    }
}
