use std::convert::Infallible;

use axum::response::sse::Event;
use futures::{Stream, StreamExt};

use crate::{
    protocol::FramePayload,
    stream::StreamEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Token,
    Error,
    Finished,
}

/// Encoded form of one [`StreamEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    pub kind: FrameKind,
    pub payload: FramePayload,
}

impl WireFrame {
    pub fn encode(event: &StreamEvent) -> Self {
        match event {
            StreamEvent::Fragment(text) => Self {
                kind: FrameKind::Token,
                payload: FramePayload {
                    token: Some(text.clone()),
                    ..FramePayload::default()
                },
            },
            StreamEvent::Error(message) => Self {
                kind: FrameKind::Error,
                payload: FramePayload {
                    error: Some(message.clone()),
                    ..FramePayload::default()
                },
            },
            StreamEvent::Finished => Self {
                kind: FrameKind::Finished,
                payload: FramePayload {
                    finished: Some(true),
                    ..FramePayload::default()
                },
            },
        }
    }

    /// Single-line JSON payload.
    pub fn data(&self) -> String {
        serde_json::to_string(&self.payload).unwrap_or_default()
    }

    /// Complete frame text including the blank terminator line, as axum
    /// writes it for [`WireFrame::into_sse_event`].
    #[cfg(test)]
    pub(crate) fn to_wire(&self) -> String {
        format!("{} {}\n\n", crate::protocol::DATA_PREFIX, self.data())
    }

    pub fn into_sse_event(self) -> Event {
        Event::default().data(self.data())
    }
}

/// Maps worker events to SSE frames one to one, in order.
///
/// An `Error` event becomes a regular data frame so the response stays open
/// and the client can observe it. Nothing is emitted after a terminal event.
pub fn encode_events<S>(events: S) -> impl Stream<Item = Result<Event, Infallible>> + Send
where
    S: Stream<Item = StreamEvent> + Send,
{
    let mut terminated = false;
    events
        .take_while(move |event| {
            let keep = !terminated;
            terminated |= event.is_terminal();
            futures::future::ready(keep)
        })
        .map(|event| Ok(WireFrame::encode(&event).into_sse_event()))
}
