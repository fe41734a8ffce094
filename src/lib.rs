pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod server;
pub mod stream;

pub use client::{Completion, CompletionSource, FallbackOrchestrator, HttpTransport, Transport};
pub use config::{AppConfig, ClientConfig};
pub use error::ServiceError;
pub use model::{GenerationRequest, GenerationSession, ModelRegistry, SamplingParameters};
pub use server::build_router;
pub use stream::{StreamEvent, TokenStream};
