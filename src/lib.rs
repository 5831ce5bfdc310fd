pub mod commands;
pub mod config;
pub mod errors;
pub mod executor;
pub mod flow_engine;
pub mod orchestrator;
pub mod perception;
pub mod store;

use std::sync::Arc;

use crate::commands::PilotHandle;
use crate::config::AppConfig;
use crate::errors::PilotResult;
use crate::orchestrator::{CommandInitiator, FlowInitiator, UnconfiguredInitiator};
use crate::perception::traits::UiDriver;
use crate::store::{SqliteStore, WorkItemStore};

/// Installs the global subscriber (`RUST_LOG` wins) and loads `.env`.
/// Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ussdpilot_lib=debug,info")),
        )
        .try_init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();
}

/// Initiator from config, or one that always fails when no command is set.
pub fn initiator_from_config(cfg: &AppConfig) -> Arc<dyn FlowInitiator> {
    match CommandInitiator::from_config(&cfg.initiation) {
        Some(init) => Arc::new(init),
        None => {
            tracing::warn!("no initiation command configured; every item will fail to start");
            Arc::new(UnconfiguredInitiator)
        }
    }
}

/// Loads `config.toml` (defaults when missing), opens the SQLite backlog and
/// launches the pilot over `driver`.
pub async fn launch(driver: Arc<dyn UiDriver>) -> PilotResult<PilotHandle> {
    init_tracing();

    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "config unavailable, using defaults");
            AppConfig::default()
        }
    };

    let path = cfg.store.resolved_path();
    let store: Arc<dyn WorkItemStore> = Arc::new(SqliteStore::open(&path)?);
    tracing::info!(path = %path.display(), "work item store opened");

    let initiator = initiator_from_config(&cfg);
    Ok(PilotHandle::launch(&cfg, driver, store, initiator))
}
