//! Line-oriented wire format shared by the SSE endpoint and the streaming client.
//!
//! Every frame is a `data: <json>` line followed by a blank line. Lines that
//! start with `:` are heartbeats. The final frame carries `"finished": true`.

mod decoder;
mod encoder;
mod lines;

use serde::Serialize;
use serde_json::Value;

pub use decoder::{DecodedEvent, FrameDecoder, decode_stream, error_annotation};
pub use encoder::{FrameKind, WireFrame, encode_events};
pub use lines::LineSplitter;

pub const DATA_PREFIX: &str = "data:";
pub const COMMENT_SENTINEL: char = ':';
/// End marker used by OpenAI-style producers.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Text fields checked in priority order.
pub const TEXT_FIELDS: [&str; 3] = ["token", "delta", "content"];
pub const ERROR_FIELD: &str = "error";
pub const FINISHED_FIELD: &str = "finished";
pub const RESPONSE_FIELD: &str = "response";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FramePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<bool>,
}

/// Reads a non-streaming `response` value: a string, or a list joined by newlines.
pub fn full_response(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}
