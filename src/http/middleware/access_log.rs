//! Common Log access lines.
//!
//! One line per request, emitted on the access target once the response
//! body has been fully written or dropped:
//!
//! ```text
//! 127.0.0.1:50312 - - [02/Jan/2006:15:04:05 -0700] "GET /v1/users/7 HTTP/1.1" 200 27 0.004 - "curl/8.5.0"
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{header, HeaderMap},
    middleware::{self, Next},
    response::Response,
    Router,
};
use chrono::{DateTime, Local};
use futures_util::StreamExt;
use tracing::Dispatch;

use crate::http::middleware::Middleware;
use crate::observability::logging::{self, ACCESS_TARGET, LOG_TIME_FORMAT};

/// Fields of one access line.
#[derive(Debug, Clone)]
pub struct AccessEntry {
    pub remote: String,
    pub time: DateTime<Local>,
    pub method: String,
    pub url: String,
    pub proto: String,
    pub status: u16,
    pub size: u64,
    pub duration: Duration,
    pub referer: String,
    pub user_agent: String,
}

impl AccessEntry {
    /// Render the Common Log line.
    pub fn to_line(&self) -> String {
        format!(
            "{} - - [{}] \"{} {} {}\" {} {} {:.3} {} \"{}\"",
            self.remote,
            self.time.format(LOG_TIME_FORMAT),
            self.method,
            self.url,
            self.proto,
            self.status,
            self.size,
            self.duration.as_secs_f64(),
            self.referer,
            self.user_agent,
        )
    }
}

/// Emits the entry when dropped, so it fires exactly once per request.
struct PendingEntry {
    entry: AccessEntry,
    started: Instant,
    /// Sinks in effect when the request arrived; the drop may run elsewhere.
    dispatch: Dispatch,
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        self.entry.duration = self.started.elapsed();
        let line = self.entry.to_line();
        tracing::dispatcher::with_default(&self.dispatch, || {
            tracing::info!(target: ACCESS_TARGET, "{line}");
        });
    }
}

/// Middleware writing one Common Log line per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonLog;

/// One Common Log line per request on the access sink.
pub fn common_log() -> CommonLog {
    CommonLog
}

impl Middleware for CommonLog {
    fn wrap(&self, router: Router) -> Router {
        router.layer(middleware::from_fn(log_request))
    }
}

fn header_or_dash(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("-")
        .to_string()
}

async fn log_request(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut pending = PendingEntry {
        entry: AccessEntry {
            remote,
            time: Local::now(),
            method: request.method().to_string(),
            url: request.uri().to_string(),
            proto: format!("{:?}", request.version()),
            status: 0,
            size: 0,
            duration: Duration::ZERO,
            referer: header_or_dash(request.headers(), header::REFERER),
            user_agent: header_or_dash(request.headers(), header::USER_AGENT),
        },
        started,
        dispatch: logging::current(),
    };

    let response = next.run(request).await;
    pending.entry.status = response.status().as_u16();

    let (parts, body) = response.into_parts();
    let counted = body.into_data_stream().map(move |chunk| {
        if let Ok(bytes) = &chunk {
            pending.entry.size += bytes.len() as u64;
        }
        chunk
    });

    Response::from_parts(parts, Body::from_stream(counted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry() -> AccessEntry {
        AccessEntry {
            remote: "10.0.0.1:5000".to_string(),
            time: Local.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap(),
            method: "GET".to_string(),
            url: "/v1/users/7?verbose=1".to_string(),
            proto: "HTTP/1.1".to_string(),
            status: 404,
            size: 57,
            duration: Duration::from_millis(12),
            referer: "-".to_string(),
            user_agent: "curl/8.5.0".to_string(),
        }
    }

    #[test]
    fn common_log_layout() {
        let entry = entry();
        let offset = entry.time.format("%z").to_string();
        assert_eq!(
            entry.to_line(),
            format!(
                "10.0.0.1:5000 - - [02/Jan/2006:15:04:05 {offset}] \"GET /v1/users/7?verbose=1 HTTP/1.1\" 404 57 0.012 - \"curl/8.5.0\""
            )
        );
    }

    #[test]
    fn missing_headers_become_dashes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, "".parse().unwrap());
        assert_eq!(header_or_dash(&headers, header::USER_AGENT), "-");
        assert_eq!(header_or_dash(&headers, header::REFERER), "-");

        headers.insert(header::REFERER, "https://example.com/".parse().unwrap());
        assert_eq!(header_or_dash(&headers, header::REFERER), "https://example.com/");
    }
}
