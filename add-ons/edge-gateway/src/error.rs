use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use edge_voice::CompletionError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request body: {0}")]
    BadRequest(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("HF_TOKEN is not set")]
    MissingToken,

    #[error("upstream error: {0}")]
    Upstream(#[from] CompletionError),

    #[error("{0}")]
    Internal(String),
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            GatewayError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "invalid request body", "detail": detail }),
            ),
            GatewayError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                json!({ "error": "Method Not Allowed" }),
            ),
            // Upstream status and body excerpt go back to the caller for debugging.
            GatewayError::Upstream(err) => {
                let error = match err.status() {
                    Some(status) => format!("upstream error {}", status),
                    None => "upstream error".to_string(),
                };
                let detail = match err {
                    CompletionError::RateLimited { body, .. } | CompletionError::Service { body, .. } => {
                        body.clone()
                    }
                    other => other.to_string(),
                };
                (StatusCode::BAD_GATEWAY, json!({ "error": error, "detail": detail }))
            }
            GatewayError::Config(_) | GatewayError::MissingToken | GatewayError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": self.to_string() }),
            ),
        };
        if status.is_server_error() {
            tracing::warn!(target: "edge::gateway", "request failed: {}", self);
        }
        (status, Json(body)).into_response()
    }
}
