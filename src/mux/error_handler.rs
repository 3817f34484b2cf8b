//! Per-code error rendering, hooked into the mux.
//!
//! A failed backend call is turned into exactly one HTTP response here:
//! a registered renderer for the call's code gets the first chance; if it
//! declines (or none is registered) the built-in renderer answers with
//! `{"code", "message", "details"}`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::Response,
};
use serde_json::{json, Value};

use crate::error::BoxError;
use crate::mux::marshal::{JsonMarshaler, Marshaler};
use crate::mux::status::{Code, Status};

/// Body written when a rendered error message cannot be serialized.
pub const FALLBACK_BODY: &str = r#"{"code": 13, "message": "failed to marshal error message"}"#;

/// Renders a message for a failed call, or returns `None` to use the default.
pub type ErrorRenderer = Arc<dyn Fn(&Parts, &Status) -> Option<Value> + Send + Sync>;

/// At most one renderer per code; registering again replaces it.
#[derive(Clone, Default)]
pub struct ErrorPolicy {
    renderers: HashMap<Code, ErrorRenderer>,
}

impl ErrorPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `renderer` for `code`, replacing any earlier one.
    pub fn insert<F>(&mut self, code: Code, renderer: F)
    where
        F: Fn(&Parts, &Status) -> Option<Value> + Send + Sync + 'static,
    {
        self.renderers.insert(code, Arc::new(renderer));
    }

    /// The renderer registered for `code`.
    pub fn get(&self, code: Code) -> Option<&ErrorRenderer> {
        self.renderers.get(&code)
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }
}

impl fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<_> = self.renderers.keys().map(|c| c.as_i32()).collect();
        codes.sort_unstable();
        f.debug_struct("ErrorPolicy").field("codes", &codes).finish()
    }
}

/// The mux's error hook.
#[derive(Clone)]
pub struct ErrorResponder {
    policy: ErrorPolicy,
    marshaler: Arc<dyn Marshaler>,
}

impl ErrorResponder {
    /// Responder rendering through `policy`, then the default body.
    pub fn new(policy: ErrorPolicy, marshaler: Arc<dyn Marshaler>) -> Self {
        Self { policy, marshaler }
    }

    /// Render the response for a failed call.
    pub fn handle(&self, parts: &Parts, err: BoxError) -> Response {
        let status = Status::from_error(err);

        if let Some(renderer) = self.policy.get(status.code()) {
            if let Some(message) = renderer(parts, &status) {
                return self.render(status.code().http_status(), &message, &status);
            }
        }

        self.render_default(&status)
    }

    /// The built-in renderer.
    pub fn render_default(&self, status: &Status) -> Response {
        let message = json!({
            "code": status.code().as_i32(),
            "message": status.message(),
            "details": [],
        });
        self.render(status.code().http_status(), &message, status)
    }

    fn render(&self, http_status: StatusCode, message: &Value, status: &Status) -> Response {
        let content_type = HeaderValue::from_str(self.marshaler.content_type())
            .unwrap_or_else(|_| HeaderValue::from_static("application/json"));

        match self.marshaler.marshal(message) {
            Ok(buf) => build_response(http_status, content_type, Body::from(buf)),
            Err(err) => {
                tracing::error!(status = %status, error = %err, "Failed to marshal error message");
                build_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    content_type,
                    Body::from(FALLBACK_BODY),
                )
            }
        }
    }
}

impl Default for ErrorResponder {
    fn default() -> Self {
        Self::new(ErrorPolicy::default(), Arc::new(JsonMarshaler))
    }
}

impl fmt::Debug for ErrorResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorResponder")
            .field("policy", &self.policy)
            .field("content_type", &self.marshaler.content_type())
            .finish()
    }
}

fn build_response(status: StatusCode, content_type: HeaderValue, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    response
}
