use std::path::PathBuf;

use anyhow::Context;

use sigil_infra::{EngineConfig, PostgresEventStore};

/// Boot check: load configuration and, if a database is configured, apply
/// the event store schema.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sigil_observability::init();

    let file = std::env::var_os("SIGIL_CONFIG").map(PathBuf::from);
    let config = EngineConfig::load(file.as_deref()).context("loading configuration")?;
    let policy = config.retry_policy();
    tracing::info!(max_attempts = policy.max_attempts, "configuration loaded");

    if config.database_url.is_none() {
        tracing::warn!("SIGIL_DATABASE_URL not set; nothing to migrate");
        return Ok(());
    }

    let store = PostgresEventStore::connect(&config)
        .await
        .context("connecting to the event store")?;
    store.migrate().await.context("migrating the event store")?;
    tracing::info!("event store schema is up to date");
    Ok(())
}
