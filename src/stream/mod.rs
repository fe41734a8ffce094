mod events;
mod token_stream;
mod worker;

use std::time::Duration;

use crate::config::AppConfig;

pub use events::StreamEvent;
pub use token_stream::{CancelOutcome, TokenStream};

/// Per-request handoff settings.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub channel_capacity: usize,
    pub join_timeout: Duration,
}

impl StreamSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            channel_capacity: config.stream_channel_capacity,
            join_timeout: config.cancel_join_timeout,
        }
    }
}
