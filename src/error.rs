//! HTTP-facing error type.
//!
//! Handlers return [`ProxyError`], which renders as an OpenAI-style error
//! body: `{"error": {"message", "type", "code"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("all tool calling strategies failed")]
    StrategiesExhausted,

    #[error("agent stopped after {0} tool rounds without a final answer")]
    TooManyToolRounds(usize),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Upstream(UpstreamError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::ToolNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::StrategiesExhausted | ProxyError::TooManyToolRounds(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ProxyError::Upstream(_) => "UpstreamError",
            ProxyError::ToolNotFound(_) => "NotFoundError",
            ProxyError::BadRequest(_) => "BadRequestError",
            ProxyError::StrategiesExhausted | ProxyError::TooManyToolRounds(_) => {
                "InternalServerError"
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }
        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
                "code": status.as_u16(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::ToolNotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::Upstream(UpstreamError::Timeout).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ProxyError::StrategiesExhausted.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
