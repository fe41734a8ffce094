use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::Stream;
use tower_http::trace::TraceLayer;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        ConfigResponse, GenerateResponse, GenerationRequest, ModelRegistry, SamplingDefaultsView,
    },
    protocol::encode_events,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
}

pub fn build_router(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Router {
    let state = AppState { registry, config };

    Router::new()
        .route("/health", get(health))
        .route("/config", get(model_config))
        .route("/generate", post(generate))
        .route("/generate/stream", post(generate_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn model_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let defaults = state.registry.defaults();
    Json(ConfigResponse {
        model: state.registry.model_id().to_string(),
        defaults: SamplingDefaultsView {
            temperature: defaults.temperature,
            top_p: defaults.top_p,
            max_tokens: defaults.max_new_tokens,
        },
    })
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerateResponse>, ServiceError> {
    let response = state
        .registry
        .generate(&request, state.config.generation_timeout)
        .await?;
    Ok(Json(GenerateResponse { response }))
}

// Dropping the response body (client disconnect) drops the token stream,
// which cancels the worker.
async fn generate_stream(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServiceError> {
    let stream = state.registry.stream(&request)?;
    let frames = encode_events(stream.into_events());

    Ok(Sse::new(frames).keep_alive(KeepAlive::new().interval(state.config.heartbeat_interval)))
}
