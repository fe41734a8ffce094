use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use reqwest::{StatusCode, header::ACCEPT};
use serde_json::Value;
use tracing::debug;

use crate::{
    config::ClientConfig,
    error::ServiceError,
    model::GenerationRequest,
    protocol::{ERROR_FIELD, RESPONSE_FIELD, full_response},
};

pub type ByteStream = BoxStream<'static, Result<Bytes, ServiceError>>;

/// Connection to a generation server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts a streaming generation and returns the raw response body.
    async fn open_stream(&self, request: &GenerationRequest) -> Result<ByteStream, ServiceError>;

    /// Runs the same generation as one synchronous call.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ServiceError> {
        // Only the connect phase is bounded here; a stream may legitimately run
        // longer than any single request timeout.
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_stream(&self, request: &GenerationRequest) -> Result<ByteStream, ServiceError> {
        let url = self.config.stream_url();
        debug!(%url, "opening generation stream");
        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ServiceError::from))
            .boxed())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        let url = self.config.generate_url();
        debug!(%url, "issuing synchronous generation");
        let response = self.client.post(&url).json(request).send().await?;
        let body: Value = ensure_success(response).await?.json().await?;
        parse_full_response(&body)
    }
}

/// Extracts the answer from a `{"response": ...}` body.
pub fn parse_full_response(body: &Value) -> Result<String, ServiceError> {
    body.get(RESPONSE_FIELD)
        .and_then(full_response)
        .ok_or_else(|| {
            ServiceError::Transport(format!(
                "response body has no usable '{RESPONSE_FIELD}' field"
            ))
        })
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let raw = response.text().await.unwrap_or_default();
    Err(status_error(status, &raw))
}

fn status_error(status: StatusCode, raw: &str) -> ServiceError {
    let message = serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get(ERROR_FIELD).and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| raw.trim().to_string());

    match status {
        StatusCode::INTERNAL_SERVER_ERROR => ServiceError::Generation(message),
        // Rejections of the request body itself; a missing route falls through
        // to Transport so a sync-only server still gets the fallback.
        StatusCode::BAD_REQUEST
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => {
            ServiceError::BadRequest(format!("{status}: {message}"))
        }
        _ => ServiceError::Transport(format!("{status}: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn response_field_accepts_string_or_list() {
        assert_eq!(
            parse_full_response(&json!({"response": "Fertig"})).unwrap(),
            "Fertig"
        );
        assert_eq!(
            parse_full_response(&json!({"response": ["a", "b"]})).unwrap(),
            "a\nb"
        );
        assert!(matches!(
            parse_full_response(&json!({"answer": "x"})),
            Err(ServiceError::Transport(_))
        ));
    }

    #[test]
    fn status_errors_map_to_taxonomy() {
        let err = status_error(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"oom"}"#);
        assert!(matches!(err, ServiceError::Generation(ref m) if m == "oom"));

        let err = status_error(StatusCode::BAD_REQUEST, r#"{"error":"bad top_p"}"#);
        assert!(matches!(err, ServiceError::BadRequest(ref m) if m.contains("bad top_p")));

        let err = status_error(StatusCode::NOT_FOUND, "");
        assert!(matches!(err, ServiceError::Transport(_)));

        let err = status_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(err, ServiceError::Transport(ref m) if m.contains("upstream down")));
    }
}
