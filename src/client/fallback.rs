use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::{info, warn};

use crate::{
    client::Transport,
    error::ServiceError,
    model::GenerationRequest,
    protocol::{DecodedEvent, decode_stream},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    Streamed,
    Fallback,
}

#[derive(Debug)]
pub struct Completion {
    pub text: String,
    pub source: CompletionSource,
    /// Failure that cut a stream short after it had already produced text.
    pub interruption: Option<ServiceError>,
}

/// How the streaming phase ended.
#[derive(Debug)]
enum StreamEnd {
    Finished,
    Closed,
    Failed(ServiceError),
}

struct StreamOutcome {
    end: StreamEnd,
    producer_error: Option<String>,
}

/// Streams a generation and falls back to one synchronous request when the
/// stream yields no usable text. The whole run is bounded by `deadline`.
pub struct FallbackOrchestrator<T> {
    transport: T,
    deadline: Duration,
}

impl<T: Transport> FallbackOrchestrator<T> {
    pub fn new(transport: T, deadline: Duration) -> Self {
        Self {
            transport,
            deadline,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// `on_text` receives every piece of renderable text in arrival order,
    /// including the fallback answer when one is fetched.
    pub async fn run<F>(
        &self,
        request: &GenerationRequest,
        mut on_text: F,
    ) -> Result<Completion, ServiceError>
    where
        F: FnMut(&str) + Send,
    {
        request.validate()?;
        let start = Instant::now();
        let mut streamed = String::new();
        let outcome = tokio::time::timeout(
            self.deadline,
            self.run_inner(request, &mut on_text, &mut streamed),
        )
        .await;

        let completion = match outcome {
            Ok(completion) => completion?,
            // Text already rendered stays the answer; the deadline is reported with it.
            Err(_) if !streamed.trim().is_empty() => {
                warn!(
                    deadline = ?self.deadline,
                    partial_chars = streamed.len(),
                    "deadline hit mid-stream"
                );
                Completion {
                    text: streamed,
                    source: CompletionSource::Streamed,
                    interruption: Some(ServiceError::Timeout(self.deadline)),
                }
            }
            Err(_) => return Err(ServiceError::Timeout(self.deadline)),
        };
        info!(
            source = ?completion.source,
            chars = completion.text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generation completed"
        );
        Ok(completion)
    }

    async fn run_inner<F>(
        &self,
        request: &GenerationRequest,
        on_text: &mut F,
        streamed: &mut String,
    ) -> Result<Completion, ServiceError>
    where
        F: FnMut(&str) + Send,
    {
        let outcome = self.stream_phase(request, on_text, streamed).await?;

        if !streamed.trim().is_empty() {
            let interruption = match outcome.end {
                StreamEnd::Failed(err) => Some(err),
                StreamEnd::Finished | StreamEnd::Closed => {
                    outcome.producer_error.map(ServiceError::Generation)
                }
            };
            return Ok(Completion {
                text: std::mem::take(streamed),
                source: CompletionSource::Streamed,
                interruption,
            });
        }

        let reason = match &outcome.end {
            StreamEnd::Failed(err) => err.to_string(),
            StreamEnd::Finished | StreamEnd::Closed => ServiceError::EmptyStream.to_string(),
        };
        info!(%reason, "stream yielded no usable text, issuing synchronous request");

        let text = self.transport.generate(request).await?;
        on_text(&text);
        Ok(Completion {
            text,
            source: CompletionSource::Fallback,
            interruption: None,
        })
    }

    /// Appends usable text to `text` as it arrives, so a caller that gives up
    /// early still sees everything rendered so far.
    async fn stream_phase<F>(
        &self,
        request: &GenerationRequest,
        on_text: &mut F,
        text: &mut String,
    ) -> Result<StreamOutcome, ServiceError>
    where
        F: FnMut(&str) + Send,
    {
        let bytes = match self.transport.open_stream(request).await {
            Ok(bytes) => bytes,
            // The server rejected the request itself; a synchronous retry would too.
            Err(err @ (ServiceError::BadRequest(_) | ServiceError::InvalidParameter(_))) => {
                return Err(err);
            }
            Err(err) => {
                warn!(error = %err, "could not open generation stream");
                return Ok(StreamOutcome {
                    end: StreamEnd::Failed(err),
                    producer_error: None,
                });
            }
        };

        let events = decode_stream(bytes);
        futures::pin_mut!(events);

        let mut producer_error = None;
        let mut end = StreamEnd::Closed;
        while let Some(event) = events.next().await {
            if let Some(shown) = event.display_text() {
                on_text(&shown);
            }
            match event {
                DecodedEvent::Text(fragment) | DecodedEvent::Complete(fragment) => {
                    text.push_str(&fragment);
                }
                DecodedEvent::ErrorNotice(message) => {
                    warn!(%message, "producer reported an error mid-stream");
                    producer_error = Some(message);
                }
                DecodedEvent::Finished => {
                    end = StreamEnd::Finished;
                    break;
                }
                DecodedEvent::TransportError(message) => {
                    warn!(%message, partial_chars = text.len(), "stream interrupted");
                    end = StreamEnd::Failed(ServiceError::Transport(message));
                    break;
                }
            }
        }

        Ok(StreamOutcome {
            end,
            producer_error,
        })
    }
}
