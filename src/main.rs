use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use review_relay::{
    AppStoreClient, Config, FileCursorStore, JwtTokenProvider, Orchestrator, ReviewFetcher,
    SlackNotifier, VersionCorrelator,
};

#[derive(Parser)]
#[command(name = "review-relay")]
#[command(about = "Relay new App Store reviews to Slack, one pass per invocation")]
struct Cli {
    /// Storefront to sync
    #[arg(long, value_enum, default_value_t = Platform::Apple, env = "REVIEW_RELAY_PLATFORM")]
    platform: Platform,

    /// Path to config file (defaults to config/<platform>.yml)
    #[arg(long, env = "REVIEW_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding per-platform cursor files
    #[arg(long, default_value = "latest_check_timestamp", env = "REVIEW_RELAY_STATE_DIR")]
    state_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Platform {
    Apple,
}

impl Platform {
    fn key(self) -> &'static str {
        match self {
            Platform::Apple => "apple",
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            Platform::Apple => "Apple",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("review_relay=info".parse()?))
        .init();

    let cli = Cli::parse();
    let platform = cli.platform;

    let config_path = cli
        .config
        .unwrap_or_else(|| Config::default_path(platform.key()));
    let config = Config::load(&config_path)?;

    // Validate all settings before any network activity
    let credentials = config.app_store.credentials()?;
    let slack = config.slack.settings()?;

    let tokens = JwtTokenProvider::from_credentials(&credentials)
        .context("Failed to set up App Store Connect authentication")?;

    let client = AppStoreClient::new(Arc::new(tokens))
        .with_base_url(&config.app_store.base_url)
        .with_retry(config.retry.policy());

    let orchestrator = Orchestrator::new(
        ReviewFetcher::new(client.clone(), credentials.app_id.as_str()),
        VersionCorrelator::new(client, credentials.app_id.as_str()),
        SlackNotifier::new(&slack),
        FileCursorStore::new(&cli.state_dir),
        platform.key(),
        platform.display_name(),
    );

    let summary = orchestrator.run().await?;

    if let Some(report) = summary.delivery {
        info!(
            delivered = report.delivered,
            failed = report.failed,
            "Delivery summary"
        );
    }

    Ok(())
}
