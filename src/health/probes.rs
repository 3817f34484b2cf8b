//! Built-in liveness and status probes.
//!
//! Both are ordinary path handlers registered on the mux, so they sit
//! behind the middleware chain like every other route.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, StatusCode},
    response::Response,
};
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::health::state::ServerStats;
use crate::mux::{PathRequest, PathRoute};

/// Liveness probe body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub time: String,
    /// Seconds since this server instance started.
    pub uptime: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Resident memory of the process, in bytes.
    pub memory: u64,
    pub virtual_memory: u64,
    pub num_workers: usize,
    pub num_tasks: usize,
    pub request_count: u64,
}

impl HealthReport {
    /// Snapshot uptime and wall-clock time.
    pub fn collect(stats: &ServerStats) -> Self {
        Self {
            status: "ok",
            time: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.3f%:z")
                .to_string(),
            uptime: stats.uptime().as_secs_f64(),
        }
    }
}

impl StatusReport {
    /// Snapshot process memory and runtime counters.
    ///
    /// The sysinfo refresh is blocking, so it runs on the blocking pool.
    pub async fn collect(stats: &ServerStats) -> Self {
        let (memory, virtual_memory) = tokio::task::spawn_blocking(|| {
            let pid = Pid::from_u32(std::process::id());
            let mut sys = System::new();
            sys.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::new().with_memory(),
            );
            sys.process(pid)
                .map(|p| (p.memory(), p.virtual_memory()))
                .unwrap_or((0, 0))
        })
        .await
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Failed to collect process memory");
            (0, 0)
        });

        let runtime = tokio::runtime::Handle::current().metrics();

        Self {
            memory,
            virtual_memory,
            num_workers: runtime.num_workers(),
            num_tasks: runtime.num_alive_tasks(),
            request_count: stats.request_count(),
        }
    }
}

/// `GET path` answering with a [`HealthReport`].
pub fn health_route(path: &str) -> PathRoute {
    PathRoute {
        method: Method::GET,
        path: path.to_string(),
        handler: Arc::new(|req: PathRequest| async move {
            json_response(&HealthReport::collect(&req.server))
        }),
    }
}

/// `GET path` answering with a [`StatusReport`].
pub fn status_route(path: &str) -> PathRoute {
    PathRoute {
        method: Method::GET,
        path: path.to_string(),
        handler: Arc::new(|req: PathRequest| async move {
            json_response(&StatusReport::collect(&req.server).await)
        }),
    }
}

fn json_response<T: Serialize>(report: &T) -> Response {
    let (status, body) = match serde_json::to_vec(report) {
        Ok(body) => (StatusCode::OK, body),
        Err(err) => {
            tracing::error!(error = %err, "Failed to encode probe report");
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
