use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::response;
use crate::server::AppState;
use crate::service::AggregateStats;

#[derive(Serialize)]
pub struct StatsResponse {
    success: bool,
    stats: AggregateStats,
}

/// GET /api/v1/stats
pub async fn stats(State(state): State<AppState>) -> Response {
    match state.service.aggregate_stats().await {
        Ok(stats) => (StatusCode::OK, Json(StatsResponse { success: true, stats })).into_response(),
        Err(e) => response::service_error(&e, "Failed to load stats"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{TestApp, body_json};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn empty_stats() {
        let app = TestApp::new(false);
        let response = app.router().oneshot(get("/api/v1/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["stats"]["total_bots"], 0);
        assert_eq!(body["stats"]["online"], 0);
        assert_eq!(body["stats"]["total_memory"], 0);
    }

    #[tokio::test]
    async fn unreachable_supervisor_is_503() {
        let app = TestApp::new(false);
        app.supervisor.set_reachable(false);

        let response = app.router().oneshot(get("/api/v1/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["success"], false);
    }
}
