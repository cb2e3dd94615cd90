//! Monitor binary that watches registered Stellar wallets through Horizon.

use std::io;

use fraud_watch_domain::config::MonitorConfig;
use fraud_watch_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use fraud_watch_monitor::{run_monitor, HorizonFeed, MonitorError};
use fraud_watch_storage::SeaOrmStorage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[monitor] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), MonitorError> {
    let config = MonitorConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("MONITOR");
    let telemetry = init_telemetry(&telemetry_config)?;
    if let Some(addr) = telemetry.metrics_listener() {
        info!(%addr, "prometheus exporter listening");
    }
    let storage = SeaOrmStorage::connect(config.database_url()).await?;
    let feed = HorizonFeed::new(config.horizon_url())?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(err) => warn!(%err, "failed to listen for shutdown signal; stopping"),
        }
        signal_token.cancel();
    });

    run_monitor(&config, storage, feed, cancel).await;
    Ok(())
}
