//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::Method;
use rpc_front_gateway::mux::{EndpointContext, Reply, RpcRequest, ServeMux, Status};
use rpc_front_gateway::{BoxError, Gateway, GatewayBuilder};
use serde_json::json;

/// Builder listening on an ephemeral loopback port with console output off.
pub fn local_builder() -> GatewayBuilder {
    GatewayBuilder::new()
        .with_server("127.0.0.1", 0)
        .with_silent(true)
        .with_drain_timeout(Duration::from_secs(2))
}

/// Build and start, returning the gateway and its address.
pub async fn start(builder: GatewayBuilder) -> (Gateway, SocketAddr) {
    let mut gateway = builder.build().unwrap();
    let addr = gateway.start().await.unwrap();
    (gateway, addr)
}

/// Client that never pools or proxies, so a stopped gateway is observed immediately.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// A stand-in backend service:
/// - `GET /v1/users/{id}` echoes the id and the forwarded metadata
/// - `id == "missing"` fails with `NotFound`
/// - every reply carries `trace-id` and `internal-cost` response metadata
#[allow(dead_code)]
pub fn users_endpoint(ctx: &EndpointContext<'_>, mux: &mut ServeMux) -> Result<(), BoxError> {
    let backend = ctx.target().to_string();
    mux.handle(Method::GET, "/v1/users/{id}", move |req: RpcRequest| {
        let backend = backend.clone();
        async move {
            let id = req.param("id").unwrap_or_default().to_string();
            if id == "missing" {
                return Err::<Reply, BoxError>(Box::new(Status::not_found(format!(
                    "user {id} not found"
                ))));
            }

            let forwarded: Vec<&str> = req.metadata.keys().collect();
            Ok(Reply::new(json!({
                "id": id,
                "backend": backend,
                "forwarded": forwarded,
                "bio": "lorem ipsum ".repeat(64),
            }))
            .with_metadata("trace-id", vec!["trace-1".to_string()])
            .with_metadata("internal-cost", vec!["42".to_string()]))
        }
    })?;
    Ok(())
}
