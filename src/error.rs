use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no generation backend is available (build with --features tch-backend)")]
    BackendUnavailable,
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("invalid sampling parameter: {0}")]
    InvalidParameter(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("stream finished without producing any text")]
    EmptyStream,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::BadRequest(_) | ServiceError::InvalidParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Generation(_) | ServiceError::Tokenizer(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::EmptyStream | ServiceError::Transport(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Transport(err.to_string())
    }
}
