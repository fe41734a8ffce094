use std::fmt::Display;

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::debug;

use crate::protocol::{
    COMMENT_SENTINEL, DATA_PREFIX, DONE_SENTINEL, ERROR_FIELD, FINISHED_FIELD, LineSplitter,
    RESPONSE_FIELD, TEXT_FIELDS, full_response,
};

/// Normalized unit recovered from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// Incremental fragment.
    Text(String),
    /// Whole answer from a producer that did not stream.
    Complete(String),
    /// Producer-reported error, rendered inline.
    ErrorNotice(String),
    /// Explicit end marker; nothing is decoded afterwards.
    Finished,
    /// The byte stream itself failed.
    TransportError(String),
}

impl DecodedEvent {
    /// Text a caller should render for this event, if any.
    pub fn display_text(&self) -> Option<String> {
        match self {
            DecodedEvent::Text(text) | DecodedEvent::Complete(text) => Some(text.clone()),
            DecodedEvent::ErrorNotice(message) => Some(error_annotation(message)),
            DecodedEvent::Finished | DecodedEvent::TransportError(_) => None,
        }
    }
}

const UNSPECIFIED_ERROR: &str = "producer reported an error";

pub fn error_annotation(message: &str) -> String {
    format!("\n[error: {message}]\n")
}

/// Tolerant line decoder. Never fails: input it cannot interpret is passed
/// through as plain text.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    finished: bool,
}

impl FrameDecoder {
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn decode_line(&mut self, line: &str) -> Vec<DecodedEvent> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.starts_with(COMMENT_SENTINEL) {
            return out;
        }

        if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
            let payload = rest.strip_prefix(' ').unwrap_or(rest);
            self.decode_data(payload, &mut out);
        } else if line.trim_start().starts_with('{') {
            match serde_json::from_str::<Map<String, Value>>(line.trim()) {
                Ok(object) => self.decode_object(&object, line, &mut out),
                Err(err) => {
                    debug!(error = %err, "undecodable structured line, passing through");
                    out.push(DecodedEvent::Text(line.to_string()));
                }
            }
        } else {
            out.push(DecodedEvent::Text(line.to_string()));
        }
        out
    }

    fn decode_data(&mut self, payload: &str, out: &mut Vec<DecodedEvent>) {
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return;
        }
        if trimmed == DONE_SENTINEL {
            self.finish(out);
            return;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(object)) => self.decode_object(&object, payload, out),
            Ok(Value::String(text)) => {
                if !text.is_empty() {
                    out.push(DecodedEvent::Text(text));
                }
            }
            Ok(_) => out.push(DecodedEvent::Text(payload.to_string())),
            Err(err) => {
                debug!(error = %err, "data payload is not JSON, treating as text");
                out.push(DecodedEvent::Text(payload.to_string()));
            }
        }
    }

    /// `raw` is the line text the object came from, used when a text field
    /// carries something other than a string.
    fn decode_object(
        &mut self,
        object: &Map<String, Value>,
        raw: &str,
        out: &mut Vec<DecodedEvent>,
    ) {
        let before = out.len();

        match extract_text(object) {
            Some(Value::String(text)) => {
                if !text.is_empty() {
                    out.push(DecodedEvent::Text(text.clone()));
                }
            }
            Some(other) => {
                debug!(value = %other, "non-string text field, passing line through");
                out.push(DecodedEvent::Text(raw.to_string()));
            }
            None => {
                if let Some(answer) = object.get(RESPONSE_FIELD).and_then(full_response) {
                    out.push(DecodedEvent::Complete(answer));
                    self.finish(out);
                    return;
                }
            }
        }

        match object.get(ERROR_FIELD) {
            Some(Value::String(message)) => out.push(DecodedEvent::ErrorNotice(message.clone())),
            Some(Value::Bool(true)) => {
                out.push(DecodedEvent::ErrorNotice(UNSPECIFIED_ERROR.to_string()))
            }
            _ => {}
        }

        if object.get(FINISHED_FIELD).and_then(Value::as_bool) == Some(true) {
            self.finish(out);
            return;
        }

        if out.len() == before {
            debug!(?object, "payload without recognized fields ignored");
        }
    }

    fn finish(&mut self, out: &mut Vec<DecodedEvent>) {
        if !self.finished {
            self.finished = true;
            out.push(DecodedEvent::Finished);
        }
    }
}

/// First present, non-null text field in priority order.
fn extract_text(object: &Map<String, Value>) -> Option<&Value> {
    TEXT_FIELDS
        .iter()
        .find_map(|field| object.get(*field).filter(|value| !value.is_null()))
}

/// Decodes a chunked byte stream into events.
///
/// Stops after `Finished`, after a transport error, or when the bytes run out;
/// a final unterminated line is still decoded.
pub fn decode_stream<S, B, E>(bytes: S) -> impl Stream<Item = DecodedEvent> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    async_stream::stream! {
        let mut lines = LineSplitter::default();
        let mut decoder = FrameDecoder::default();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let decoded: Vec<DecodedEvent> = match chunk {
                Ok(chunk) => lines
                    .push(chunk.as_ref())
                    .iter()
                    .flat_map(|line| decoder.decode_line(line))
                    .collect(),
                Err(err) => {
                    yield DecodedEvent::TransportError(err.to_string());
                    return;
                }
            };
            for event in decoded {
                yield event;
            }
            if decoder.is_finished() {
                return;
            }
        }

        if let Some(line) = lines.finish() {
            for event in decoder.decode_line(&line) {
                yield event;
            }
        }
    }
}
