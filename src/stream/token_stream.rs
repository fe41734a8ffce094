use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
    time::Duration,
};

use futures::Stream;
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, warn};

use crate::{
    error::ServiceError,
    model::{ChatPrompt, GenerationSession, SamplingParameters},
    stream::{
        StreamEvent, StreamSettings,
        worker::{self, WorkerHandle},
    },
};

const WORKER_VANISHED: &str = "generation worker exited without a final event";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The stream had already reached its final event.
    AlreadyFinished,
    /// The worker stopped within the join window.
    Joined,
    /// The worker did not react in time and keeps running unobserved.
    Detached,
}

/// Lazy, finite, non-restartable sequence of generated fragments.
///
/// Owns exactly one generation worker. Dropping the stream before its final
/// event asks the worker to stop and reaps it in the background.
pub struct TokenStream {
    events: mpsc::Receiver<StreamEvent>,
    worker: Option<WorkerHandle>,
    join_timeout: Duration,
    done: bool,
}

impl TokenStream {
    pub fn start(
        session: Arc<dyn GenerationSession>,
        prompt: ChatPrompt,
        params: SamplingParameters,
        settings: StreamSettings,
    ) -> Self {
        let (events, handle) = worker::spawn(session, prompt, params, settings.channel_capacity);
        Self {
            events,
            worker: Some(handle),
            join_timeout: settings.join_timeout,
            done: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    pub fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        if self.done {
            return Poll::Ready(None);
        }
        match ready!(self.events.poll_recv(cx)) {
            Some(event) => {
                if event.is_terminal() {
                    self.finish();
                }
                Poll::Ready(Some(event))
            }
            None => {
                self.finish();
                Poll::Ready(Some(StreamEvent::Error(WORKER_VANISHED.to_string())))
            }
        }
    }

    /// Next raw event. Returns `None` once a `Finished` or `Error` has been seen.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        futures::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Next fragment; `None` at the end, `Some(Err(_))` once on failure.
    pub async fn next_fragment(&mut self) -> Option<Result<String, ServiceError>> {
        match self.next_event().await? {
            StreamEvent::Fragment(text) => Some(Ok(text)),
            StreamEvent::Error(message) => Some(Err(ServiceError::Generation(message))),
            StreamEvent::Finished => None,
        }
    }

    /// Drains the stream into one string.
    pub async fn collect_text(mut self) -> Result<String, ServiceError> {
        let mut text = String::new();
        while let Some(fragment) = self.next_fragment().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }

    /// Converts into a stream of raw events ending with the terminal event.
    pub fn into_events(mut self) -> impl Stream<Item = StreamEvent> + Send {
        futures::stream::poll_fn(move |cx| self.poll_event(cx))
    }

    /// Stops consuming, signals the worker and waits for it within the join window.
    pub async fn cancel(mut self) -> CancelOutcome {
        if self.done {
            return CancelOutcome::AlreadyFinished;
        }
        self.done = true;
        self.events.close();
        let Some(worker) = self.worker.take() else {
            return CancelOutcome::AlreadyFinished;
        };
        worker.request_stop();
        if worker.join_within(self.join_timeout).await {
            CancelOutcome::Joined
        } else {
            warn!("generation worker detached after cancellation");
            CancelOutcome::Detached
        }
    }

    fn finish(&mut self) {
        self.done = true;
        // The worker has written its last event; dropping the handle only detaches a
        // task that is about to return.
        self.worker = None;
    }
}

impl Stream for TokenStream {
    type Item = Result<String, ServiceError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match ready!(self.get_mut().poll_event(cx)) {
            Some(StreamEvent::Fragment(text)) => Poll::Ready(Some(Ok(text))),
            Some(StreamEvent::Error(message)) => {
                Poll::Ready(Some(Err(ServiceError::Generation(message))))
            }
            Some(StreamEvent::Finished) | None => Poll::Ready(None),
        }
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Some(worker) = self.worker.take() else {
            return;
        };
        debug!("token stream abandoned before completion");
        worker.request_stop();
        self.events.close();

        if let Ok(handle) = Handle::try_current() {
            let window = self.join_timeout;
            handle.spawn(async move {
                if !worker.join_within(window).await {
                    warn!("abandoned generation worker detached");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Instant,
    };

    use futures::StreamExt;

    use super::*;
    use crate::model::Fragments;

    #[derive(Clone)]
    enum Step {
        Text(&'static str),
        Fail(&'static str),
        Panic,
    }

    struct ScriptedSession {
        steps: Vec<Step>,
        fail_on_begin: bool,
        delay: Duration,
        pulled: Arc<AtomicUsize>,
    }

    impl ScriptedSession {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps,
                fail_on_begin: false,
                delay: Duration::ZERO,
                pulled: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl GenerationSession for ScriptedSession {
        fn name(&self) -> &str {
            "scripted"
        }

        fn begin<'a>(
            &'a self,
            _prompt: &ChatPrompt,
            _params: &SamplingParameters,
        ) -> Result<Fragments<'a>, ServiceError> {
            if self.fail_on_begin {
                return Err(ServiceError::Generation("model not warmed up".into()));
            }
            Ok(Box::new(self.steps.iter().map(move |step| {
                if !self.delay.is_zero() {
                    thread::sleep(self.delay);
                }
                self.pulled.fetch_add(1, Ordering::SeqCst);
                match step {
                    Step::Text(text) => Ok(text.to_string()),
                    Step::Fail(message) => Err(ServiceError::Generation(message.to_string())),
                    Step::Panic => panic!("tensor shape mismatch"),
                }
            })))
        }
    }

    fn settings(join_timeout: Duration) -> StreamSettings {
        StreamSettings {
            channel_capacity: 2,
            join_timeout,
        }
    }

    fn start(session: ScriptedSession) -> TokenStream {
        TokenStream::start(
            Arc::new(session),
            ChatPrompt {
                system: "sys".into(),
                user: "hi".into(),
            },
            SamplingParameters::new(0.0, 1.0, 8).unwrap(),
            settings(Duration::from_millis(200)),
        )
    }

    #[tokio::test]
    async fn fragments_arrive_in_emission_order() {
        let words: Vec<&'static str> = vec!["a", "b", "c", "d", "e", "f", "g", "h"];
        let session = ScriptedSession::new(words.iter().map(|w| Step::Text(*w)).collect());
        let mut stream = start(session);

        let mut seen = Vec::new();
        while let Some(fragment) = stream.next_fragment().await {
            seen.push(fragment.unwrap());
        }
        assert_eq!(seen, words);
        assert!(stream.is_finished());
        assert!(stream.next_fragment().await.is_none());
    }

    #[tokio::test]
    async fn empty_fragments_are_skipped() {
        let session =
            ScriptedSession::new(vec![Step::Text("Hel"), Step::Text(""), Step::Text("lo")]);
        assert_eq!(start(session).collect_text().await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn failure_before_first_fragment_is_reported() {
        let mut session = ScriptedSession::new(vec![Step::Text("never")]);
        session.fail_on_begin = true;
        let mut stream = start(session);

        match stream.next_fragment().await {
            Some(Err(ServiceError::Generation(message))) => {
                assert_eq!(message, "model not warmed up")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(stream.next_fragment().await.is_none());
    }

    #[tokio::test]
    async fn mid_stream_failure_terminates_after_prior_fragments() {
        let session = ScriptedSession::new(vec![
            Step::Text("one "),
            Step::Fail("out of memory"),
            Step::Text("never"),
        ]);
        let events: Vec<StreamEvent> = start(session).into_events().collect().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Fragment("one ".into()),
                StreamEvent::Error("out of memory".into()),
            ]
        );
    }

    #[tokio::test]
    async fn panicking_session_surfaces_as_error_event() {
        let session = ScriptedSession::new(vec![Step::Text("x"), Step::Panic]);
        let events: Vec<StreamEvent> = start(session).into_events().collect().await;
        assert_eq!(events.len(), 2);
        match &events[1] {
            StreamEvent::Error(message) => assert!(message.contains("tensor shape mismatch")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn finished_is_the_last_event() {
        let session = ScriptedSession::new(vec![Step::Text("x")]);
        let events: Vec<StreamEvent> = start(session).into_events().collect().await;
        assert_eq!(
            events,
            vec![StreamEvent::Fragment("x".into()), StreamEvent::Finished]
        );
    }

    #[tokio::test]
    async fn stream_trait_yields_fragments_only() {
        let session = ScriptedSession::new(vec![Step::Text("a"), Step::Text("b")]);
        let items: Vec<String> = start(session)
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(items, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cancel_after_partial_read_joins_within_window() {
        let steps = (0..50).map(|_| Step::Text("tok")).collect();
        let session = ScriptedSession::new(steps).with_delay(Duration::from_millis(5));
        let pulled = session.pulled.clone();
        let mut stream = start(session);

        for _ in 0..3 {
            stream.next_fragment().await.unwrap().unwrap();
        }
        let started = Instant::now();
        let outcome = stream.cancel().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(outcome, CancelOutcome::Joined);

        let after_cancel = pulled.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pulled.load(Ordering::SeqCst), after_cancel);
        assert!(after_cancel < 50);
    }

    #[tokio::test]
    async fn unresponsive_worker_is_detached_after_window() {
        let steps = vec![Step::Text("slow"), Step::Text("slower")];
        let session = ScriptedSession::new(steps).with_delay(Duration::from_millis(300));
        let mut stream = TokenStream::start(
            Arc::new(session),
            ChatPrompt {
                system: String::new(),
                user: "hi".into(),
            },
            SamplingParameters::new(0.5, 0.9, 4).unwrap(),
            settings(Duration::from_millis(20)),
        );

        let first = stream.next_fragment().await.unwrap().unwrap();
        assert_eq!(first, "slow");

        let started = Instant::now();
        let outcome = stream.cancel().await;
        assert_eq!(outcome, CancelOutcome::Detached);
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn cancel_on_finished_stream_is_a_no_op() {
        let mut stream = start(ScriptedSession::new(vec![Step::Text("x")]));
        while stream.next_fragment().await.is_some() {}
        assert_eq!(stream.cancel().await, CancelOutcome::AlreadyFinished);
    }

    #[tokio::test]
    async fn dropping_stream_stops_the_worker() {
        let steps = (0..100).map(|_| Step::Text("t")).collect();
        let session = ScriptedSession::new(steps).with_delay(Duration::from_millis(2));
        let pulled = session.pulled.clone();
        let mut stream = start(session);
        stream.next_fragment().await.unwrap().unwrap();
        drop(stream);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let settled = pulled.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pulled.load(Ordering::SeqCst), settled);
        assert!(settled < 100);
    }
}
