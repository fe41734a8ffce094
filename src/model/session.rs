use crate::{
    error::ServiceError,
    model::{ChatPrompt, SamplingParameters},
};

/// Lazy, in-order text fragments produced by one generation call.
pub type Fragments<'a> = Box<dyn Iterator<Item = Result<String, ServiceError>> + 'a>;

/// Handle over loaded model and tokenizer state.
///
/// `begin` is called exactly once per request, on a blocking thread. The
/// returned iterator may block between items and may fail at any point.
pub trait GenerationSession: Send + Sync {
    fn name(&self) -> &str;

    fn begin<'a>(
        &'a self,
        prompt: &ChatPrompt,
        params: &SamplingParameters,
    ) -> Result<Fragments<'a>, ServiceError>;
}
