//! Franchise server binary.

use franchise_server::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let file_config = Config::from_config_path()?;

    // RUST_LOG wins, then LOG_LEVEL, then the file
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| file_config.server.log_level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = file_config.with_env(|key| std::env::var(key).ok())?;
    franchise_server::run(config).await?;

    Ok(())
}
