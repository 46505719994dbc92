use anyhow::{Context, Result};
use greenhouse_config::AppConfig;
use greenhouse_db::DbClient;
use greenhouse_ingest::{FarmbotClient, MyFoodClient};
use greenhouse_server::{Application, ChannelHub, Services};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Observability
    greenhouse_obs::init("greenhoused");

    // Config
    let config = AppConfig::load().context("failed to load configuration")?;
    if config.uses_default_secret() {
        warn!("SECRET is not set, tokens are signed with the default passphrase");
    }
    info!(
        env = %config.server.env,
        greenhouse_id = config.myfood.greenhouse_id,
        "configuration loaded"
    );

    // Store
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("failed to open database")?;

    // Third-party sources
    let timeout = Duration::from_secs(config.http.timeout_secs);
    let measures = MyFoodClient::new(&config.myfood.api_url, timeout)
        .context("invalid MyFood configuration")?;
    let farmbot = FarmbotClient::new(&config.farmbot.api_url, &config.farmbot.token, timeout)
        .context("invalid FarmBot configuration")?;

    let services = Services {
        db,
        channels: ChannelHub::new(),
        config: Arc::new(config),
        measures: Arc::new(measures),
        farmbot: Arc::new(farmbot),
    };

    Application::with_default_modules(services)
        .await
        .serve()
        .await
}
