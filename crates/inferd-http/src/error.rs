//! HTTP error type and the mapping from domain errors to status codes.
//!
//! All error responses share one body shape:
//! `{"error": {"message", "type", "param", "code"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use inferd_core::error::CoreError;

/// Adapter-level error carrying the HTTP classification.
#[derive(Debug)]
pub enum HttpError {
    /// Malformed input; 400.
    BadRequest(String),
    /// Unknown id; 404.
    NotFound(String),
    /// Duplicate id on create; 409.
    Conflict(String),
    /// Model path or load failure; 422 with structured details.
    ModelLoading {
        message: String,
        details: serde_json::Value,
    },
    /// Anything else; 500 with a sanitized message.
    Internal(String),
}

impl HttpError {
    /// 422 with the attempted parameters echoed in `details`.
    #[must_use]
    pub fn model_loading(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::ModelLoading {
            message: message.into(),
            details,
        }
    }
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message, error_type, details) = match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, message, "invalid_request_error", None)
            }
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message, "not_found_error", None),
            Self::Conflict(message) => (StatusCode::CONFLICT, message, "conflict_error", None),
            Self::ModelLoading { message, details } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                message,
                "model_loading_error",
                Some(details),
            ),
            Self::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                message,
                "internal_error",
                None,
            ),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                message,
                error_type,
                param: None,
                code: Some(status.as_u16().to_string()),
                details,
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<CoreError> for HttpError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(message) => Self::BadRequest(message),
            CoreError::NotFound(message) => Self::NotFound(message),
            CoreError::Conflict(message) => Self::Conflict(message),
            CoreError::ModelLoading(message) => Self::ModelLoading {
                message,
                details: serde_json::Value::Null,
            },
            CoreError::Download(err) => Self::ModelLoading {
                message: err.to_string(),
                details: serde_json::Value::Null,
            },
            // Execution, timeout and cancellation normally travel inside
            // result payloads; one leaking here is an internal fault.
            CoreError::Execution(message)
            | CoreError::Timeout(message)
            | CoreError::Cancelled(message)
            | CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_expected_statuses() {
        let cases = [
            (CoreError::Validation("v".into()), StatusCode::BAD_REQUEST),
            (CoreError::NotFound("n".into()), StatusCode::NOT_FOUND),
            (CoreError::Conflict("c".into()), StatusCode::CONFLICT),
            (
                CoreError::ModelLoading("m".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                CoreError::Internal("i".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let response = HttpError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }
}
