//! Process management HTTP handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::logs::{DEFAULT_TAIL_LINES, LogTail, MAX_TAIL_LINES};
use crate::metrics::{DEFAULT_QUERY_LIMIT, DEFAULT_WINDOW_HOURS, MAX_QUERY_LIMIT, MAX_WINDOW_HOURS};
use crate::model::{ActionRecord, MetricSample, ProcessDefinition, ProcessId, UnifiedStatus};
use crate::registry::{NewProcess, ProcessPatch};
use crate::response;
use crate::server::AppState;
use crate::service::{CommandOutcome, ServiceError};

/// Largest history page accepted from clients.
const MAX_HISTORY_LIMIT: usize = 1000;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ListProcessesResponse {
    success: bool,
    processes: Vec<UnifiedStatus>,
}

#[derive(Serialize)]
pub struct ProcessResponse {
    success: bool,
    process: UnifiedStatus,
}

#[derive(Serialize)]
pub struct DefinitionResponse {
    success: bool,
    message: String,
    process: ProcessDefinition,
}

#[derive(Serialize)]
pub struct CommandResponse {
    success: bool,
    message: String,
}

#[derive(Deserialize)]
pub struct LogsQuery {
    lines: Option<usize>,
}

#[derive(Serialize)]
pub struct LogsResponse {
    success: bool,
    logs: LogTail,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    success: bool,
    history: Vec<ActionRecord>,
}

#[derive(Deserialize)]
pub struct MetricsQuery {
    hours: Option<u32>,
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    success: bool,
    metrics: Vec<MetricSample>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/processes
pub async fn list_processes(State(state): State<AppState>) -> Response {
    let processes = state.service.list_with_status().await;
    (
        StatusCode::OK,
        Json(ListProcessesResponse {
            success: true,
            processes,
        }),
    )
        .into_response()
}

/// GET /api/v1/processes/{id}
pub async fn get_process(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.get_one_with_status(&ProcessId::from(id)).await {
        Ok(process) => (
            StatusCode::OK,
            Json(ProcessResponse {
                success: true,
                process,
            }),
        )
            .into_response(),
        Err(e) => response::service_error(&e, "Failed to load process"),
    }
}

/// POST /api/v1/processes
pub async fn create_process(
    State(state): State<AppState>,
    Json(req): Json<NewProcess>,
) -> Response {
    match state.service.create(req).await {
        Ok(process) => (
            StatusCode::CREATED,
            Json(DefinitionResponse {
                success: true,
                message: format!("Process \"{}\" created", process.name),
                process,
            }),
        )
            .into_response(),
        Err(e) => response::service_error(&e, "Failed to create process"),
    }
}

/// PUT /api/v1/processes/{id}
pub async fn update_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ProcessPatch>,
) -> Response {
    match state.service.update(&ProcessId::from(id), req).await {
        Ok(process) => (
            StatusCode::OK,
            Json(DefinitionResponse {
                success: true,
                message: format!("Process \"{}\" updated", process.name),
                process,
            }),
        )
            .into_response(),
        Err(e) => response::service_error(&e, "Failed to update process"),
    }
}

/// DELETE /api/v1/processes/{id}
pub async fn delete_process(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    command_response(
        state.service.delete(&ProcessId::from(id)).await,
        "Failed to delete process",
    )
}

/// POST /api/v1/processes/{id}/start
pub async fn start_process(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    command_response(
        state.service.start(&ProcessId::from(id)).await,
        "Failed to start process",
    )
}

/// POST /api/v1/processes/{id}/stop
pub async fn stop_process(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    command_response(
        state.service.stop(&ProcessId::from(id)).await,
        "Failed to stop process",
    )
}

/// POST /api/v1/processes/{id}/restart
pub async fn restart_process(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    command_response(
        state.service.restart(&ProcessId::from(id)).await,
        "Failed to restart process",
    )
}

/// GET /api/v1/processes/{id}/logs?lines=N
pub async fn process_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let lines = query.lines.unwrap_or(DEFAULT_TAIL_LINES);
    if !(1..=MAX_TAIL_LINES).contains(&lines) {
        return response::bad_request(format!("lines must be between 1 and {}", MAX_TAIL_LINES));
    }

    match state.service.logs_tail(&ProcessId::from(id), lines).await {
        Ok(logs) => (StatusCode::OK, Json(LogsResponse { success: true, logs })).into_response(),
        Err(e) => response::service_error(&e, "Failed to read logs"),
    }
}

/// GET /api/v1/processes/{id}/history?limit=N
pub async fn process_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
        return response::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_HISTORY_LIMIT
        ));
    }

    match state.service.history(&ProcessId::from(id), limit) {
        Ok(history) => (
            StatusCode::OK,
            Json(HistoryResponse {
                success: true,
                history,
            }),
        )
            .into_response(),
        Err(e) => response::service_error(&e, "Failed to load history"),
    }
}

/// GET /api/v1/processes/{id}/metrics?hours=H&limit=N
pub async fn process_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let hours = query.hours.unwrap_or(DEFAULT_WINDOW_HOURS);
    if !(1..=MAX_WINDOW_HOURS).contains(&hours) {
        return response::bad_request(format!(
            "hours must be between 1 and {}",
            MAX_WINDOW_HOURS
        ));
    }
    let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    if !(1..=MAX_QUERY_LIMIT).contains(&limit) {
        return response::bad_request(format!("limit must be between 1 and {}", MAX_QUERY_LIMIT));
    }

    match state.service.metrics(&ProcessId::from(id), hours, limit) {
        Ok(metrics) => (
            StatusCode::OK,
            Json(MetricsResponse {
                success: true,
                metrics,
            }),
        )
            .into_response(),
        Err(e) => response::service_error(&e, "Failed to load metrics"),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn command_response(result: Result<CommandOutcome, ServiceError>, context: &str) -> Response {
    match result {
        Ok(outcome) => match outcome.error {
            None => (
                StatusCode::OK,
                Json(CommandResponse {
                    success: true,
                    message: outcome.message,
                }),
            )
                .into_response(),
            Some(e) => response::error(
                response::status_for(&e),
                outcome.message,
                Some(e.to_string()),
            ),
        },
        Err(e) => response::service_error(&e, context),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{TestApp, body_json};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn create(app: &TestApp, name: &str) -> String {
        let script = app.script(&format!("{}.py", name.to_lowercase()));
        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/processes",
                json!({"name": name, "type": "python", "script_path": script}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        body["process"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn create_list_and_get() {
        let app = TestApp::new(false);
        let id = create(&app, "Echo").await;

        let response = app
            .router()
            .oneshot(empty_request(Method::GET, "/api/v1/processes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["processes"][0]["id"], id.as_str());
        assert_eq!(body["processes"][0]["status"], "offline");
        assert_eq!(body["processes"][0]["kind"], "scripted-py");

        let response = app
            .router()
            .oneshot(empty_request(Method::GET, &format!("/api/v1/processes/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["process"]["name"], "Echo");
        assert_eq!(body["process"]["uptime"], 0);
    }

    #[tokio::test]
    async fn create_rejects_unknown_kind() {
        let app = TestApp::new(false);
        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/processes",
                json!({"name": "Echo", "type": "ruby", "script_path": "/srv/echo.rb"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn unknown_process_is_404() {
        let app = TestApp::new(false);
        for (method, uri) in [
            (Method::GET, "/api/v1/processes/nope"),
            (Method::DELETE, "/api/v1/processes/nope"),
            (Method::POST, "/api/v1/processes/nope/start"),
            (Method::GET, "/api/v1/processes/nope/history"),
            (Method::GET, "/api/v1/processes/nope/metrics"),
        ] {
            let response = app
                .router()
                .oneshot(empty_request(method.clone(), uri))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{} {}", method, uri);
        }
    }

    #[tokio::test]
    async fn start_stop_and_history() {
        let app = TestApp::new(false);
        let id = create(&app, "Echo").await;

        let response = app
            .router()
            .oneshot(empty_request(Method::POST, &format!("/api/v1/processes/{}/start", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);

        let response = app
            .router()
            .oneshot(empty_request(Method::POST, &format!("/api/v1/processes/{}/stop", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .router()
            .oneshot(empty_request(
                Method::GET,
                &format!("/api/v1/processes/{}/history", id),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        let actions: Vec<_> = body["history"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["action"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(actions, vec!["stop", "start", "created"]);
    }

    #[tokio::test]
    async fn failed_stop_reports_error_detail() {
        let app = TestApp::new(false);
        let id = create(&app, "Echo").await;

        let response = app
            .router()
            .oneshot(empty_request(Method::POST, &format!("/api/v1/processes/{}/stop", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("not running"));
    }

    #[tokio::test]
    async fn query_bounds_are_enforced() {
        let app = TestApp::new(false);
        let id = create(&app, "Echo").await;

        for uri in [
            format!("/api/v1/processes/{}/logs?lines=0", id),
            format!("/api/v1/processes/{}/logs?lines=1001", id),
            format!("/api/v1/processes/{}/metrics?hours=0", id),
            format!("/api/v1/processes/{}/metrics?hours=169", id),
            format!("/api/v1/processes/{}/metrics?limit=10001", id),
            format!("/api/v1/processes/{}/history?limit=0", id),
        ] {
            let response = app
                .router()
                .oneshot(empty_request(Method::GET, &uri))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }

        let response = app
            .router()
            .oneshot(empty_request(
                Method::GET,
                &format!("/api/v1/processes/{}/metrics?hours=168&limit=10000", id),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn update_then_delete() {
        let app = TestApp::new(false);
        let id = create(&app, "Echo").await;

        let response = app
            .router()
            .oneshot(json_request(
                Method::PUT,
                &format!("/api/v1/processes/{}", id),
                json!({"name": "Echo Two", "auto_restart": false}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["process"]["name"], "Echo Two");
        assert_eq!(body["process"]["auto_restart"], false);

        let response = app
            .router()
            .oneshot(empty_request(Method::DELETE, &format!("/api/v1/processes/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .router()
            .oneshot(empty_request(Method::DELETE, &format!("/api/v1/processes/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn read_only_mode_blocks_mutations() {
        let app = TestApp::new(true);
        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/processes",
                json!({"name": "Echo", "type": "python", "script_path": "/srv/echo.py"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .router()
            .oneshot(empty_request(Method::GET, "/api/v1/processes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
