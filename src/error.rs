//! REST-surface error type (§6.1). The signaling channel has its own error
//! taxonomy (`hub::JoinError`, carried in an `ERROR` envelope rather than an
//! HTTP response) — this type only answers for `/health`, `/rooms` and
//! `/rooms/{room_id}/messages`, which have exactly one failure mode: a
//! malformed `limit` query parameter.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    status: u16,
}

/// Structured API error that serializes to JSON:
///
/// ```json
/// {"error": {"code": "bad_request", "message": "...", "status": 400}}
/// ```
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub status: StatusCode,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_client_error() {
            tracing::warn!(code = self.code, status = self.status.as_u16(), "{}", self.message);
        } else if self.status.is_server_error() {
            tracing::error!(code = self.code, status = self.status.as_u16(), "{}", self.message);
        }

        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: self.code,
                message: self.message,
                status: self.status.as_u16(),
            },
        };
        (self.status, Json(envelope)).into_response()
    }
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError {
            code: "bad_request",
            message: msg.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn json_structure() {
        let response = ApiError::bad_request("limit must be a non-negative integer").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"]["code"], "bad_request");
        assert_eq!(value["error"]["status"], 400);
    }
}
