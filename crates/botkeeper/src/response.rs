//! JSON response envelopes.
//!
//! Every body carries `success` and, for failures, a human-readable `message`
//! with the underlying error in `error`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::service::ServiceError;
use crate::supervisor::SupervisorError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn error(status: StatusCode, message: impl Into<String>, detail: Option<String>) -> Response {
    let body = ErrorBody {
        success: false,
        message: message.into(),
        error: detail,
    };
    (status, Json(body)).into_response()
}

pub fn bad_request(message: impl Into<String>) -> Response {
    error(StatusCode::BAD_REQUEST, message, None)
}

pub fn not_found(message: impl Into<String>) -> Response {
    error(StatusCode::NOT_FOUND, message, None)
}

pub fn forbidden(message: impl Into<String>) -> Response {
    error(StatusCode::FORBIDDEN, message, None)
}

pub fn internal_error(message: impl Into<String>) -> Response {
    error(StatusCode::INTERNAL_SERVER_ERROR, message, None)
}

/// Status code a service failure is reported with.
pub fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Filesystem(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::Conflict(_) => StatusCode::CONFLICT,
        ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
        ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Supervisor(e) => match e {
            SupervisorError::NotFound(_) => StatusCode::NOT_FOUND,
            SupervisorError::NotRunning(_) | SupervisorError::Rejected(_) => StatusCode::CONFLICT,
            SupervisorError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SupervisorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        },
    }
}

/// Report a service failure. Validation and lookup failures carry their own
/// text as the message; everything else gets `context` plus the detail.
pub fn service_error(err: &ServiceError, context: &str) -> Response {
    let status = status_for(err);
    match err {
        ServiceError::Validation(msg) => error(status, msg.clone(), None),
        ServiceError::NotFound(_) => error(status, "Process not found", None),
        ServiceError::Forbidden(msg) => error(status, format!("Forbidden: {}", msg), None),
        other => error(status, context, Some(other.to_string())),
    }
}
