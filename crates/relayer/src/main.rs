use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod server;
mod tasks;

use config::RelayerConfig;
use server::RelayerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relayer=info,algocash_sdk=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting AlgoCash relayer");

    let config = RelayerConfig::from_env()?;
    info!("Ledger backend: {:?}", config.backend);
    info!("Denominations: {}", config.denominations);
    info!("Payout source: {:?}", config.payout_mode);
    info!("Listening on: {}:{}", config.host, config.port);

    let state = Arc::new(RelayerState::new(config).await?);
    let _background = tasks::spawn_background(state.clone());

    server::run(state).await?;
    Ok(())
}
