//! Mokosh entry point. Runs the Discord or the Telegram bot, chosen by
//! `MOKOSH_PLATFORM`.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mokosh::classifier::{ClassifierClient, Classify};
use mokosh::config::{MokoshConfig, Platform};
use mokosh::database::Database;
use mokosh::error::Result;
use mokosh::health::spawn_health_server;
use mokosh::{discord, telegram_handlers};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // RUST_LOG overrides the default, e.g. RUST_LOG=mokosh=debug
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        build = env!("BUILD_TIMESTAMP"),
        commit = env!("GIT_COMMIT"),
        "Mokosh starting..."
    );

    let config = MokoshConfig::from_env()?;
    tracing::info!(
        platform = ?config.platform,
        api_url = %config.api_url,
        "Configuration loaded"
    );

    spawn_health_server(config.health_port);

    let db = Arc::new(Database::new(&config.db_path).await?);
    db.health_check().await?;
    tracing::info!(path = %config.db_path, "Database initialized");

    let classifier: Arc<dyn Classify> = Arc::new(ClassifierClient::new(
        config.api_url.clone(),
        config.api_token.clone(),
        config.requests_per_minute,
    )?);

    match config.platform {
        Platform::Discord => discord::run(&config, db, classifier).await?,
        Platform::Telegram => telegram_handlers::run(&config, db, classifier).await?,
    }

    tracing::info!("Mokosh stopped");
    Ok(())
}
