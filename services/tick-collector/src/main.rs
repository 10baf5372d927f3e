use std::path::PathBuf;
use std::sync::Arc;

use tick_collector::config::{default_config_path, CollectorsFile};
use tick_collector::manager::CollectorManager;
use tick_collector::simulated::{catalog, SimulatedTickerFactory};
use tick_collector::store::MemoryStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = tick_collector::SERVICE_VERSION, "Starting tick collector");

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("COLLECTOR_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path);

    let file = if path.exists() {
        CollectorsFile::load(&path)?
    } else {
        tracing::warn!(path = %path.display(), "No collectors file, writing a default one");
        CollectorsFile::create_default(&path)?
    };

    // In-process collaborators: simulated feed over the built-in catalog.
    let store = Arc::new(MemoryStore::with_instruments(
        catalog().into_iter().map(|(instrument, _)| instrument),
    ));
    let tickers = Arc::new(SimulatedTickerFactory::new(file.simulation.clone()));
    let manager = CollectorManager::new(store.clone(), tickers, file.pipeline.clone());

    let started = manager.load_and_start(&file).await;
    if started == 0 {
        tracing::warn!("No collectors auto-started; set auto_start = true in the collectors file");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    manager.stop_all().await;
    for (name, metrics) in manager.all_metrics() {
        tracing::info!(
            collector = %name,
            metrics = %serde_json::to_string(&metrics)?,
            "Final metrics"
        );
    }
    tracing::info!(
        ticks = store.ticks().len(),
        bars = store.bars().len(),
        "Collector shut down"
    );

    Ok(())
}
