use clap::Parser;
use codoc_relay::{AppState, RelayConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> miette::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::parse();
    codoc_relay::run(AppState::new(), config).await?;
    Ok(())
}
