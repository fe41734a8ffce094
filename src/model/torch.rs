use std::{fs, io};

use parking_lot::Mutex;
use tch::{Device, IValue, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;
use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{ChatPrompt, Fragments, GenerationSession, SamplingParameters},
};

const EOS_CANDIDATES: [&str; 4] = ["<|endoftext|>", "<|im_end|>", "</s>", "<eos>"];

/// TorchScript causal LM driven token by token.
pub struct TorchSession {
    name: String,
    device: Device,
    eos_token_id: Option<i64>,
    tokenizer: Tokenizer,
    module: Mutex<tch::CModule>,
}

impl TorchSession {
    pub fn load(config: &AppConfig) -> Result<Self, ServiceError> {
        let tokenizer = Tokenizer::from_file(config.tokenizer_path.as_path())
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;

        if !config.model_path.exists() {
            return Err(ServiceError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("model artifact missing: {}", config.model_path.display()),
            )));
        }
        let size_bytes = fs::metadata(&config.model_path)?.len();
        let mut module = tch::CModule::load_on_device(&config.model_path, config.device)
            .map_err(|e| ServiceError::Generation(e.to_string()))?;
        module.set_eval();

        let eos_token_id = EOS_CANDIDATES
            .iter()
            .find_map(|token| tokenizer.token_to_id(token))
            .map(i64::from);

        info!(
            model = %config.model_id,
            size_bytes,
            ?eos_token_id,
            device = ?config.device,
            "loaded TorchScript module"
        );

        Ok(Self {
            name: config.model_id.clone(),
            device: config.device,
            eos_token_id,
            tokenizer,
            module: Mutex::new(module),
        })
    }

    fn next_token(
        &self,
        input_ids: &[i64],
        params: &SamplingParameters,
    ) -> Result<i64, ServiceError> {
        no_grad(|| {
            let module = self.module.lock();
            let input = Tensor::from_slice(input_ids)
                .reshape([1, input_ids.len() as i64])
                .to(self.device);

            // Traced models return either the logits or a (logits, past) tuple.
            let output = module
                .forward_is(&[IValue::Tensor(input)])
                .map_err(|e| ServiceError::Generation(e.to_string()))?;
            let logits = match output {
                IValue::Tensor(t) => t,
                IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                    IValue::Tensor(t) => t.shallow_clone(),
                    _ => {
                        return Err(ServiceError::Generation(
                            "expected tensor as first tuple element".into(),
                        ));
                    }
                },
                _ => {
                    return Err(ServiceError::Generation(
                        "unexpected model output format".into(),
                    ));
                }
            };

            // [1, seq_len, vocab] -> [vocab] for the last position
            let last = logits.select(1, -1).squeeze().to_kind(Kind::Float);

            if !params.do_sample() {
                return Ok(last.argmax(0, false).int64_value(&[]));
            }

            let probs = (last / params.temperature).softmax(-1, Kind::Float);
            let (sorted, indices) = probs.sort(-1, true);
            let cumulative = sorted.cumsum(-1, Kind::Float);
            // Drop every token whose preceding mass already reaches top_p; the
            // most likely token always survives.
            let outside = (&cumulative - &sorted).gt(params.top_p);
            let kept = sorted.masked_fill(&outside, 0.0);
            let choice = kept.multinomial(1, false);
            Ok(indices.gather(-1, &choice, false).int64_value(&[0]))
        })
    }

    fn decode(&self, ids: &[i64]) -> Result<String, ServiceError> {
        let ids: Vec<u32> = ids.iter().map(|&id| id as u32).collect();
        self.tokenizer
            .decode(&ids, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))
    }
}

impl GenerationSession for TorchSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin<'a>(
        &'a self,
        prompt: &ChatPrompt,
        params: &SamplingParameters,
    ) -> Result<Fragments<'a>, ServiceError> {
        let encoding = self
            .tokenizer
            .encode(prompt.render(), true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let mut input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        if input_ids.is_empty() {
            input_ids.push(0);
        }

        Ok(Box::new(TorchFragments {
            session: self,
            params: *params,
            prompt_len: input_ids.len(),
            input_ids,
            steps: 0,
            emitted: 0,
            done: false,
        }))
    }
}

/// Autoregressive loop exposed as an iterator of newly decoded text.
///
/// The generated ids are re-decoded each step and only the new suffix is
/// emitted, so tokens that merge across boundaries are not split.
struct TorchFragments<'a> {
    session: &'a TorchSession,
    params: SamplingParameters,
    prompt_len: usize,
    input_ids: Vec<i64>,
    steps: usize,
    emitted: usize,
    done: bool,
}

impl TorchFragments<'_> {
    fn pending_text(&self, flush: bool) -> Result<Option<String>, ServiceError> {
        let text = self.session.decode(&self.input_ids[self.prompt_len..])?;
        // Hold back a trailing partial character until more tokens arrive.
        if !flush && text.ends_with('\u{FFFD}') {
            return Ok(None);
        }
        if text.len() <= self.emitted || !text.is_char_boundary(self.emitted) {
            return Ok(None);
        }
        Ok(Some(text[self.emitted..].to_string()))
    }
}

impl Iterator for TorchFragments<'_> {
    type Item = Result<String, ServiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.steps >= self.params.max_new_tokens {
                self.done = true;
                break;
            }
            self.steps += 1;

            let next = match self.session.next_token(&self.input_ids, &self.params) {
                Ok(id) => id,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            if Some(next) == self.session.eos_token_id {
                self.done = true;
                break;
            }
            self.input_ids.push(next);

            match self.pending_text(false) {
                Ok(Some(fragment)) => {
                    self.emitted += fragment.len();
                    return Some(Ok(fragment));
                }
                Ok(None) => continue,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }

        // Flush anything held back, once.
        match self.pending_text(true) {
            Ok(Some(rest)) => {
                self.emitted += rest.len();
                Some(Ok(rest))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
