mod config;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use config::Config;
use labvm_orchestrator::db::open_database;
use labvm_orchestrator::{start_reaper_task, FleetConfig, FleetOrchestrator, FleetStore};
use labvm_provider::{get_provider, ProfileRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("labvm_service=debug,labvm_orchestrator=debug,labvm_provider=debug")
        .init();

    info!("Starting labvmd...");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: provider={}, location={}, db_path={}",
        config.provider,
        config.location,
        config.db_path.display()
    );

    // Install profiles
    let mut profiles = ProfileRegistry::builtin();
    if let Some(path) = &config.profile_overrides {
        profiles.load_overrides(path)?;
        info!("Profile overrides loaded from {}", path.display());
    }
    let profiles = Arc::new(profiles);

    // Control plane
    let provider = get_provider(&config.provider)?;

    // Database setup: backup, pool, migrations
    let pool = open_database(&config.db_path).await?;
    info!("Database ready at {}", config.db_path.display());

    // Orchestrator handle shared with the embedding HTTP layer
    let orchestrator = FleetOrchestrator::new(
        FleetStore::new(pool.clone()),
        Arc::clone(&provider),
        profiles,
        FleetConfig {
            location: config.location.clone(),
            ttl_secs: config.ttl_secs,
            max_concurrency: config.max_concurrency,
        },
    );

    let pending = orchestrator.store().list_pending_requests().await?;
    info!("{} pending requests awaiting approval", pending.len());

    // Start reaper task
    tokio::spawn(start_reaper_task(
        pool.clone(),
        Arc::clone(&provider),
        config.reaper_interval_secs,
    ));
    info!(
        "Reaper task started (interval: {}s)",
        config.reaper_interval_secs
    );

    // Park until shutdown; approval calls arrive through the embedding
    // HTTP layer, which shares this pool and provider handle.
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    pool.close().await;

    Ok(())
}
