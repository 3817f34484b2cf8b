//! CORS policy, enforced with tower-http's `CorsLayer`.

use std::time::Duration;

use axum::{
    http::{HeaderName, HeaderValue, Method},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};

use crate::http::middleware::Middleware;

const WILDCARD: &str = "*";

/// CORS option set.
///
/// `"*"` in a list allows anything. Combined with credentials, a wildcard
/// mirrors the request instead, since browsers reject `*` with credentials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsPolicy {
    pub allow_credentials: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    /// Preflight cache lifetime, in seconds. Zero omits the header.
    pub max_age: u64,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allow_credentials: false,
            allowed_origins: vec![WILDCARD.to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            max_age: 0,
        }
    }
}

fn has_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v.trim() == WILDCARD)
}

impl CorsPolicy {
    /// Translate the policy into a tower-http layer.
    pub fn layer(&self) -> CorsLayer {
        let credentials = self.allow_credentials;

        let origin = if has_wildcard(&self.allowed_origins) {
            if credentials {
                AllowOrigin::mirror_request()
            } else {
                AllowOrigin::from(Any)
            }
        } else {
            let origins: Vec<HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o.trim()) {
                    Ok(v) => Some(v),
                    Err(_) => {
                        tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(origins)
        };

        let methods = if has_wildcard(&self.allowed_methods) {
            if credentials {
                AllowMethods::mirror_request()
            } else {
                AllowMethods::from(Any)
            }
        } else {
            let methods: Vec<Method> = self
                .allowed_methods
                .iter()
                .filter_map(|m| match m.trim().to_ascii_uppercase().parse::<Method>() {
                    Ok(method) => Some(method),
                    Err(_) => {
                        tracing::warn!(method = %m, "Ignoring invalid CORS method");
                        None
                    }
                })
                .collect();
            AllowMethods::list(methods)
        };

        let headers = if has_wildcard(&self.allowed_headers) {
            if credentials {
                AllowHeaders::mirror_request()
            } else {
                AllowHeaders::from(Any)
            }
        } else {
            let headers: Vec<HeaderName> = self
                .allowed_headers
                .iter()
                .filter_map(|h| HeaderName::from_bytes(h.trim().as_bytes()).ok())
                .collect();
            AllowHeaders::list(headers)
        };

        let mut layer = CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(credentials);

        if self.max_age > 0 {
            layer = layer.max_age(Duration::from_secs(self.max_age));
        }

        layer
    }
}

impl Middleware for CorsPolicy {
    fn wrap(&self, router: Router) -> Router {
        router.layer(self.layer())
    }
}
