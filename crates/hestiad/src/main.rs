//! Hestia Daemon - Smart home orchestration daemon
//!
//! Watches context, enforces constraints, learns patterns, and executes
//! screened device plans.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hestiad::config::HestiaConfig;
use hestiad::context::SharedContext;
use hestiad::devices::MemoryDirectory;
use hestiad::escalation::Escalator;
use hestiad::notify::EventBus;
use hestiad::orchestrator::Orchestrator;
use hestiad::patterns::PatternEngine;
use hestiad::planner::LlmPlanner;
use hestiad::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Hestia Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let config = HestiaConfig::load();
    let directory = MemoryDirectory::from_seeds(&config.devices);
    info!("Device directory seeded with {} device(s)", config.devices.len());

    let bus = Arc::new(EventBus::default());
    let planner = Arc::new(LlmPlanner::new(config.planner.clone()));
    let store = Arc::new(SqliteStore::open(Path::new(&config.database_path))?);
    let patterns = Arc::new(PatternEngine::new(store, planner.clone(), bus.clone())?);
    let escalator = Arc::new(Escalator::new(
        planner.clone(),
        bus.clone(),
        Duration::from_secs(config.permission_timeout_secs),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        directory,
        planner,
        patterns,
        escalator,
        bus,
        Arc::new(SharedContext::new()),
        config.load_shed.clone(),
        config.locations.clone(),
        Duration::from_secs(config.monitor_interval_secs),
    ));

    let monitor = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run().await })
    };

    info!("Hestia Daemon ready");

    tokio::signal::ctrl_c().await?;
    monitor.abort();
    info!("Shutting down gracefully");

    Ok(())
}
