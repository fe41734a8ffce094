use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

#[cfg(feature = "tch-backend")]
use tch::Device;

use crate::{error::ServiceError, model::SamplingParameters};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a precise, detail-oriented writing assistant. Answer clearly and do not guess when information is missing.";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_id: String,
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub temperature: f64,
    pub top_p: f64,
    pub max_new_tokens: i64,
    pub system_prompt: String,
    pub stream_channel_capacity: usize,
    pub cancel_join_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub generation_timeout: Duration,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));

        let model_id = env::var("MODEL_ID").unwrap_or_else(|_| "distilgpt2".to_string());
        let model_path = PathBuf::from(
            env::var("MODEL_PATH").unwrap_or_else(|_| "models/model.ts".to_string()),
        );
        let tokenizer_path = PathBuf::from(
            env::var("TOKENIZER_PATH").unwrap_or_else(|_| "models/tokenizer.json".to_string()),
        );

        let system_prompt = env::var("SYSTEM_PROMPT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let config = Self {
            listen_addr,
            model_id,
            model_path,
            tokenizer_path,
            temperature: env_or("TEMPERATURE", 0.8),
            top_p: env_or("TOP_P", 0.9),
            max_new_tokens: env_or("MAX_NEW_TOKENS", 200),
            system_prompt,
            stream_channel_capacity: env_or::<usize>("STREAM_CHANNEL_CAPACITY", 32).max(1),
            cancel_join_timeout: Duration::from_millis(env_or("CANCEL_JOIN_TIMEOUT_MS", 100)),
            heartbeat_interval: Duration::from_secs(env_or("HEARTBEAT_INTERVAL_SECS", 15)),
            generation_timeout: Duration::from_secs(env_or("GENERATION_TIMEOUT_SECS", 300)),
            #[cfg(feature = "tch-backend")]
            device: parse_device(&env::var("DEVICE").unwrap_or_else(|_| "cpu".into())),
        };

        // Reject broken defaults at start-up instead of on the first request.
        config.sampling_defaults()?;

        Ok(config)
    }

    /// Instance defaults as a validated sampling configuration.
    pub fn sampling_defaults(&self) -> Result<SamplingParameters, ServiceError> {
        SamplingParameters::new(self.temperature, self.top_p, self.max_new_tokens)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            model_id: "distilgpt2".to_string(),
            model_path: PathBuf::from("models/model.ts"),
            tokenizer_path: PathBuf::from("models/tokenizer.json"),
            temperature: 0.8,
            top_p: 0.9,
            max_new_tokens: 200,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            stream_channel_capacity: 32,
            cancel_join_timeout: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(15),
            generation_timeout: Duration::from_secs(300),
            #[cfg(feature = "tch-backend")]
            device: Device::Cpu,
        }
    }
}

/// Settings for the streaming client and its fallback path.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub stream_path: String,
    pub generate_path: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let base_url = env::var("API_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            base_url,
            stream_path: env::var("STREAM_PATH").unwrap_or_else(|_| "/generate/stream".into()),
            generate_path: env::var("GENERATE_PATH").unwrap_or_else(|_| "/generate".into()),
            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", 60)),
        }
    }

    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url, self.stream_path)
    }

    pub fn generate_url(&self) -> String {
        format!("{}{}", self.base_url, self.generate_path)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(feature = "tch-backend")]
fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            tracing::warn!(requested = %raw, "CUDA not available, falling back to CPU");
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
