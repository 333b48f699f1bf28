use api::{config::CoreConfig, logging, start_server_with_config, ApiConfig, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CoreConfig::load()?;
    let _guard = logging::init_logging(&config.logging)?;

    info!("=== Relay core starting ===");
    let state = AppState::from_config(&config).await?;

    start_server_with_config(state, ApiConfig::from(config.server.clone())).await?;

    logging::log_shutdown();
    Ok(())
}
