use cycle_ledger::{
    api::{start_server, ApiState},
    config::AppConfig,
    intake::SessionCache,
    state::{JsonFileLedgerStore, LedgerService},
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    info!("🚀 Cycle Ledger - API Server");
    info!("📍 Port: {}", config.port);
    info!("📒 Ledger: {}", config.ledger_path.display());

    let store = JsonFileLedgerStore::new(&config.ledger_path);
    let ledger = Arc::new(LedgerService::new(Box::new(store)));

    // Fail fast on an unreadable ledger instead of on the first request
    let cycles = ledger.list_cycles().await?;
    info!(cycles = cycles.len(), "✅ Ledger loaded");

    let state = ApiState::new(ledger, SessionCache::with_config(config.sessions.clone()));

    info!("📡 Starting API server...");
    start_server(state, config.port).await?;

    Ok(())
}
