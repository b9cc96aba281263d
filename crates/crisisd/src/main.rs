//! crisisd - incident correlation daemon.

use anyhow::Result;
use crisisd::correlator::OllamaCorrelator;
use crisisd::engine::Engine;
use crisisd::server::{self, AppState};
use crisisd::store::SqliteStore;
use crisis_common::config::{Config, SettingsSource, CONFIG_PATH};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("crisisd v{} starting", env!("CARGO_PKG_VERSION"));

    // Startup config fixes the surface (bind address, db path); correlation
    // thresholds stay hot-reloadable through the settings source.
    let config = Config::load();
    let settings = Arc::new(SettingsSource::new(CONFIG_PATH));

    let store = Arc::new(SqliteStore::open_at(&config.server.db_path)?);
    info!("Incident store at {}", config.server.db_path);

    let correlator = Arc::new(OllamaCorrelator::new(&config.llm));
    let engine = Engine::new(store.clone(), correlator, settings);

    let state = AppState {
        engine,
        store: store.clone(),
    };

    tokio::select! {
        result = server::run(state, &config.server.bind_addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down gracefully");
        }
    }

    Ok(())
}
