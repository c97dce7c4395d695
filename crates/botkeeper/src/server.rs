use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;
use tracing::debug;

use crate::broadcast::Broadcaster;
use crate::handlers;
use crate::response;
use crate::service::ProcessService;

/// Paths that stay writable in read-only mode (they never mutate state).
const READ_ONLY_EXEMPT: &[&str] = &["/api/v1/parse-env"];

/// Whether mutating requests are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WritePolicy {
    read_only: bool,
}

impl WritePolicy {
    pub fn new(read_only: bool) -> Self {
        Self { read_only }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn permits(&self, method: &Method, path: &str) -> bool {
        !self.read_only
            || method == Method::GET
            || method == Method::HEAD
            || READ_ONLY_EXEMPT.contains(&path)
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: ProcessService,
    pub broadcaster: Broadcaster,
    pub keep_alive_interval_seconds: u64,
}

pub fn build_app(state: AppState, policy: WritePolicy, request_timeout_secs: u64) -> Router {
    let api_v1 = Router::new()
        .route(
            "/processes",
            get(handlers::v1::list_processes).post(handlers::v1::create_process),
        )
        .route("/processes/stream", get(handlers::v1::stream_processes))
        .route(
            "/processes/{id}",
            get(handlers::v1::get_process)
                .put(handlers::v1::update_process)
                .delete(handlers::v1::delete_process),
        )
        .route("/processes/{id}/start", post(handlers::v1::start_process))
        .route("/processes/{id}/stop", post(handlers::v1::stop_process))
        .route("/processes/{id}/restart", post(handlers::v1::restart_process))
        .route("/processes/{id}/logs", get(handlers::v1::process_logs))
        .route("/processes/{id}/history", get(handlers::v1::process_history))
        .route("/processes/{id}/metrics", get(handlers::v1::process_metrics))
        .route("/stats", get(handlers::v1::stats))
        .route("/parse-env", post(handlers::v1::parse_env))
        .with_state(state);

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .nest("/api/v1", api_v1)
        .layer(middleware::from_fn_with_state(policy, enforce_write_policy))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}

async fn enforce_write_policy(
    State(policy): State<WritePolicy>,
    request: Request,
    next: Next,
) -> Response {
    if !policy.permits(request.method(), request.uri().path()) {
        debug!(method = %request.method(), path = %request.uri().path(), "Rejected write in read-only mode");
        return response::forbidden("Read-only mode: modifying operations are disabled");
    }
    next.run(request).await
}
