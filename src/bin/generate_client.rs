use std::io::{self, Write};

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streaming_llm_service::{
    ClientConfig, CompletionSource, FallbackOrchestrator, GenerationRequest, HttpTransport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("usage: generate-client <prompt>");
    }

    let config = ClientConfig::from_env();
    let mut request = GenerationRequest::new(prompt);
    request.system_prompt = std::env::var("SYSTEM_PROMPT").ok();

    let deadline = config.request_timeout;
    let transport = HttpTransport::new(config).context("building HTTP client")?;
    let orchestrator = FallbackOrchestrator::new(transport, deadline);

    let mut stdout = io::stdout();
    let completion = orchestrator
        .run(&request, |text| {
            let _ = stdout.write_all(text.as_bytes());
            let _ = stdout.flush();
        })
        .await?;
    println!();

    if completion.source == CompletionSource::Fallback {
        tracing::info!("answer fetched through the synchronous fallback");
    }
    if let Some(err) = completion.interruption {
        eprintln!("warning: {err}");
    }

    Ok(())
}

// Logs go to stderr so they never interleave with the streamed answer.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
