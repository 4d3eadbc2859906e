//! pricetrack - vendor pricelist ingestion, extraction, and comparison.
//!
//! Binary entry point: loads `.env`, initializes logging, parses the CLI,
//! and dispatches to `pricetrack::cli::run`.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pricetrack::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = "pricetrack=info";
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    pricetrack::cli::run(cli).await?;
    Ok(())
}
