//! masumi-agent - HTTP Server Entry Point
//!
//! Starts the MIP-003 API and the payment monitor.

use masumi_agent::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment may already be set.
    dotenvy::dotenv_override().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "masumi_agent=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: agent={} network={} store={:?} price={} lovelace",
        config.payment.agent_identifier,
        config.payment.network.as_str(),
        config.job_store,
        config.job_price_lovelace
    );

    api::serve(config).await?;

    Ok(())
}
