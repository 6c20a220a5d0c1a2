//! Schema migration runner for the ledger database.
//!
//! The ledger is consumed as a library: host services build `LedgerService`
//! and friends over `Repositories::postgres`. This binary only loads the
//! shared configuration, checks connectivity and applies `migrations/`.

use ledger_engine::config::Settings;
use ledger_engine::observability::{init_logging, init_metrics, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;
    init_logging(&LogConfig::from(&settings.logging));
    info!("Configuration loaded");

    if settings.metrics.enabled {
        init_metrics()?;
        info!("Prometheus recorder installed");
    }

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(Duration::from_secs(settings.database.acquire_timeout_secs))
        .connect(&settings.database.url)
        .await?;
    info!("Database connection established");

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations applied successfully");

    pool.close().await;

    Ok(())
}
