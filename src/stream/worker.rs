use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::{
    sync::mpsc,
    task::{self, JoinHandle},
};
use tracing::{debug, warn};

use crate::{
    error::ServiceError,
    model::{ChatPrompt, GenerationSession, SamplingParameters},
    stream::StreamEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Completed,
    Failed,
    /// The consumer went away before the session finished.
    Abandoned,
}

pub(crate) struct WorkerHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<WorkerExit>,
}

impl WorkerHandle {
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Waits up to `window` for the worker to exit. Returns `false` when the
    /// worker is still running and has been detached.
    pub(crate) async fn join_within(self, window: Duration) -> bool {
        match tokio::time::timeout(window, self.join).await {
            Ok(Ok(exit)) => {
                debug!(?exit, "generation worker joined");
                true
            }
            Ok(Err(err)) => {
                warn!(error = %err, "generation worker task failed to join");
                true
            }
            Err(_) => {
                debug!(?window, "generation worker still busy, detaching");
                false
            }
        }
    }
}

/// Runs one session invocation on the blocking pool and relays its output
/// through a bounded channel. The worker is the channel's only writer.
pub(crate) fn spawn(
    session: Arc<dyn GenerationSession>,
    prompt: ChatPrompt,
    params: SamplingParameters,
    capacity: usize,
) -> (mpsc::Receiver<StreamEvent>, WorkerHandle) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let join = task::spawn_blocking(move || {
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            relay(session.as_ref(), &prompt, &params, &tx, &stop_flag)
        }));
        let exit = match outcome {
            Ok(exit) => exit,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(%message, "generation session panicked");
                let _ = tx.blocking_send(StreamEvent::Error(format!(
                    "generation panicked: {message}"
                )));
                WorkerExit::Failed
            }
        };
        debug!(
            ?exit,
            session = session.name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generation worker exited"
        );
        exit
    });

    (rx, WorkerHandle { stop, join })
}

fn relay(
    session: &dyn GenerationSession,
    prompt: &ChatPrompt,
    params: &SamplingParameters,
    tx: &mpsc::Sender<StreamEvent>,
    stop: &AtomicBool,
) -> WorkerExit {
    let fragments = match session.begin(prompt, params) {
        Ok(fragments) => fragments,
        Err(err) => {
            let _ = tx.blocking_send(StreamEvent::Error(failure_message(err)));
            return WorkerExit::Failed;
        }
    };

    for item in fragments {
        if stop.load(Ordering::Acquire) {
            return WorkerExit::Abandoned;
        }
        match item {
            Ok(text) if text.is_empty() => continue,
            Ok(text) => {
                if tx.blocking_send(StreamEvent::Fragment(text)).is_err() {
                    return WorkerExit::Abandoned;
                }
            }
            Err(err) => {
                let _ = tx.blocking_send(StreamEvent::Error(failure_message(err)));
                return WorkerExit::Failed;
            }
        }
    }

    if tx.blocking_send(StreamEvent::Finished).is_err() {
        return WorkerExit::Abandoned;
    }
    WorkerExit::Completed
}

fn failure_message(err: ServiceError) -> String {
    match err {
        ServiceError::Generation(message) => message,
        other => other.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
