use serde::{Deserialize, Serialize};

use crate::{error::ServiceError, model::SamplingOverrides};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, alias = "max_new_tokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.prompt.trim().is_empty() {
            return Err(ServiceError::BadRequest("prompt must not be empty".into()));
        }
        Ok(())
    }

    pub fn overrides(&self) -> SamplingOverrides {
        SamplingOverrides {
            temperature: self.temperature,
            top_p: self.top_p,
            max_new_tokens: self.max_tokens,
        }
    }
}

/// Non-streaming answer shape shared by `/generate` and the client fallback.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub response: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigResponse {
    pub model: String,
    pub defaults: SamplingDefaultsView,
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplingDefaultsView {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_prompt_is_rejected() {
        let request = GenerationRequest::new("   \n\t");
        assert!(matches!(request.validate(), Err(ServiceError::BadRequest(_))));
        assert!(GenerationRequest::new(" hi ").validate().is_ok());
    }

    #[test]
    fn max_new_tokens_is_accepted_as_alias() {
        let request: GenerationRequest =
            serde_json::from_str(r#"{"prompt":"x","max_new_tokens":12,"top_p":0.5}"#).unwrap();
        let overrides = request.overrides();
        assert_eq!(overrides.max_new_tokens, Some(12));
        assert_eq!(overrides.top_p, Some(0.5));
        assert_eq!(overrides.temperature, None);
    }

    #[test]
    fn absent_overrides_are_not_serialized() {
        let json = serde_json::to_value(GenerationRequest::new("hello")).unwrap();
        assert_eq!(json, serde_json::json!({ "prompt": "hello" }));
    }
}
