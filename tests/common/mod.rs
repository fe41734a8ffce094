#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use streaming_llm_service::{
    AppConfig, GenerationSession, ModelRegistry, SamplingParameters, ServiceError,
    model::{ChatPrompt, Fragments},
};

/// Session that replays a fixed list of fragments, optionally failing midway.
pub struct ScriptedSession {
    fragments: Vec<String>,
    fail_after: Option<(usize, String)>,
    delay: Duration,
    begins: Arc<AtomicUsize>,
}

impl ScriptedSession {
    pub fn tokens(tokens: &[&str]) -> Self {
        Self {
            fragments: tokens.iter().map(|t| t.to_string()).collect(),
            fail_after: None,
            delay: Duration::ZERO,
            begins: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_after(mut self, count: usize, message: &str) -> Self {
        self.fail_after = Some((count, message.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn begin_counter(&self) -> Arc<AtomicUsize> {
        self.begins.clone()
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
        self.begins.fetch_add(1, Ordering::SeqCst);
        let limit = self
            .fail_after
            .as_ref()
            .map_or(self.fragments.len(), |(count, _)| *count);

        let tokens = self.fragments.iter().take(limit).map(move |fragment| {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            Ok(fragment.clone())
        });
        let failure = self
            .fail_after
            .iter()
            .map(|(_, message)| Err(ServiceError::Generation(message.clone())));

        Ok(Box::new(tokens.chain(failure)))
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        model_id: "scripted-model".to_string(),
        temperature: 0.7,
        top_p: 0.95,
        max_new_tokens: 64,
        cancel_join_timeout: Duration::from_millis(50),
        ..AppConfig::default()
    }
}

pub fn registry(session: ScriptedSession) -> Arc<ModelRegistry> {
    Arc::new(ModelRegistry::with_session(Arc::new(session), &test_config()).unwrap())
}
