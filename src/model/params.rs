use serde::Serialize;

use crate::error::ServiceError;

/// Concrete sampling configuration for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingParameters {
    pub temperature: f64,
    pub top_p: f64,
    pub max_new_tokens: usize,
}

/// Per-request overrides. Every field is independently optional.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplingOverrides {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_new_tokens: Option<i64>,
}

impl SamplingParameters {
    pub fn new(temperature: f64, top_p: f64, max_new_tokens: i64) -> Result<Self, ServiceError> {
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(ServiceError::InvalidParameter(format!(
                "temperature must be a finite value >= 0, got {temperature}"
            )));
        }
        if !(0.0..=1.0).contains(&top_p) {
            return Err(ServiceError::InvalidParameter(format!(
                "top_p must be within [0, 1], got {top_p}"
            )));
        }
        if max_new_tokens <= 0 {
            return Err(ServiceError::InvalidParameter(format!(
                "max_tokens must be positive, got {max_new_tokens}"
            )));
        }

        Ok(Self {
            temperature,
            top_p,
            max_new_tokens: max_new_tokens as usize,
        })
    }

    /// Random sampling when the temperature is positive, greedy decoding otherwise.
    pub fn do_sample(&self) -> bool {
        self.temperature > 0.0
    }
}

/// Merges overrides over instance defaults field by field and validates the result.
pub fn resolve(
    defaults: &SamplingParameters,
    overrides: &SamplingOverrides,
) -> Result<SamplingParameters, ServiceError> {
    SamplingParameters::new(
        overrides.temperature.unwrap_or(defaults.temperature),
        overrides.top_p.unwrap_or(defaults.top_p),
        overrides
            .max_new_tokens
            .unwrap_or(defaults.max_new_tokens as i64),
    )
}
