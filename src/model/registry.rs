use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{ChatPrompt, GenerationRequest, GenerationSession, SamplingParameters, resolve},
    stream::{StreamSettings, TokenStream},
};

/// Shared entry point for generation requests. Holds the read-mostly session
/// and the instance defaults; every request gets its own worker and channel.
pub struct ModelRegistry {
    session: Arc<dyn GenerationSession>,
    model_id: String,
    defaults: SamplingParameters,
    system_prompt: String,
    settings: StreamSettings,
}

impl ModelRegistry {
    pub fn initialize(config: &AppConfig) -> Result<Self, ServiceError> {
        #[cfg(feature = "tch-backend")]
        {
            let session = Arc::new(crate::model::TorchSession::load(config)?);
            Self::with_session(session, config)
        }
        #[cfg(not(feature = "tch-backend"))]
        {
            tracing::error!(
                model = %config.model_id,
                "binary was built without a generation backend; rebuild with `--features tch-backend`"
            );
            Err(ServiceError::BackendUnavailable)
        }
    }

    pub fn with_session(
        session: Arc<dyn GenerationSession>,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            session,
            model_id: config.model_id.clone(),
            defaults: config.sampling_defaults()?,
            system_prompt: config.system_prompt.clone(),
            settings: StreamSettings::from_config(config),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn defaults(&self) -> SamplingParameters {
        self.defaults
    }

    /// Validates the request, resolves sampling and starts a worker.
    ///
    /// Validation failures are returned before any worker exists.
    pub fn stream(&self, request: &GenerationRequest) -> Result<TokenStream, ServiceError> {
        request.validate()?;
        let params = resolve(&self.defaults, &request.overrides())?;
        let prompt = ChatPrompt::from_request(request, &self.system_prompt);

        info!(
            session = self.session.name(),
            max_new_tokens = params.max_new_tokens,
            temperature = params.temperature,
            top_p = params.top_p,
            do_sample = params.do_sample(),
            "starting generation"
        );

        Ok(TokenStream::start(
            self.session.clone(),
            prompt,
            params,
            self.settings,
        ))
    }

    /// Runs a generation to completion and returns the joined text.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        deadline: Duration,
    ) -> Result<String, ServiceError> {
        let start = Instant::now();
        let stream = self.stream(request)?;
        let text = tokio::time::timeout(deadline, stream.collect_text())
            .await
            .map_err(|_| ServiceError::Timeout(deadline))??;

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "generation finished"
        );
        Ok(text)
    }
}
