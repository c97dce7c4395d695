use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::response;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct ParseEnvRequest {
    #[serde(default)]
    script_path: String,
}

#[derive(Serialize)]
pub struct ParseEnvResponse {
    success: bool,
    env_vars: BTreeMap<String, String>,
    message: String,
}

/// POST /api/v1/parse-env
///
/// Reads the `.env` file next to `script_path`. A missing file is not an
/// error; the response then carries an empty map.
pub async fn parse_env(
    State(state): State<AppState>,
    Json(req): Json<ParseEnvRequest>,
) -> Response {
    if req.script_path.trim().is_empty() {
        return response::bad_request("script_path is required");
    }

    match state.service.env_from_dotenv(&req.script_path).await {
        Ok(import) => (
            StatusCode::OK,
            Json(ParseEnvResponse {
                success: true,
                env_vars: import.env_vars,
                message: import.message,
            }),
        )
            .into_response(),
        Err(e) => response::service_error(&e, "Failed to read .env file"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{TestApp, body_json};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    fn post(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/v1/parse-env")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn reads_env_even_in_read_only_mode() {
        let app = TestApp::new(true);
        let script = app.script("bot.py");
        std::fs::write(app.dir.path().join(".env"), "API_KEY='k'\n").unwrap();

        let response = app
            .router()
            .oneshot(post(json!({"script_path": script})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["env_vars"]["API_KEY"], "k");
    }

    #[tokio::test]
    async fn forbidden_locations_are_rejected() {
        let app = TestApp::new(false);
        let response = app
            .router()
            .oneshot(post(json!({"script_path": "/etc/bots/run.py"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_script_path_is_bad_request() {
        let app = TestApp::new(false);
        let response = app.router().oneshot(post(json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
