use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use marionette::config::{Cli, Settings};
use marionette::summarizer::{NoopSummarizer, OpenAiSummarizer, Summarizer};
use marionette::version::Version;
use marionette::{DebuggerCore, SERVER_VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,marionette=debug")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli)?;

    tracing::info!("marionette debugger core {SERVER_VERSION}");
    if Version::parse(SERVER_VERSION).is_none() {
        tracing::warn!("server version {SERVER_VERSION} does not parse as a release version");
    }

    let summarizer: Arc<dyn Summarizer> =
        match OpenAiSummarizer::from_env(&settings.api_base, &settings.model) {
            Some(summarizer) => Arc::new(summarizer),
            None => Arc::new(NoopSummarizer),
        };

    let core = DebuggerCore::start(&settings, summarizer).await?;
    tracing::info!("press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    core.shutdown().await;
    Ok(())
}
