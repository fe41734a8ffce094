mod params;
mod prompt;
mod registry;
mod session;
mod types;

#[cfg(feature = "tch-backend")]
mod torch;

pub use params::{SamplingOverrides, SamplingParameters, resolve};
pub use prompt::ChatPrompt;
pub use registry::ModelRegistry;
pub use session::{Fragments, GenerationSession};
#[cfg(feature = "tch-backend")]
pub use torch::TorchSession;
pub use types::{ConfigResponse, GenerateResponse, GenerationRequest, SamplingDefaultsView};
