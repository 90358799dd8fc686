use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::sync::watch;
use tracing::info;

pub mod client;
pub mod config;
pub mod error;
pub mod monitor;
pub mod normalize;
pub mod resolver;
pub mod stats;
pub mod upstream;
pub mod utils;

#[cfg(test)]
mod testing;

/// Run the battery watch daemon: load `.env` and config, build the client,
/// and poll the configured vehicle until Ctrl-C.
pub async fn run() -> Result<()> {
    // Load environment variables from .env
    dotenv().ok();

    let config = config::AppConfig::load();
    let vin = config
        .vin
        .clone()
        .context("VEHICLE_VIN is not set (environment or myrenault.toml)")?;

    let thresholds = Thresholds::from_config(&config)?;
    let client = Arc::new(MyRenaultClient::from_config(&config, None, None)?);

    let (installed, latest) = client.check_api_version().await;
    info!("myrenault {} (latest published: {})", installed, latest);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = BatteryMonitor::new(client.clone(), &vin, Arc::new(LogNotifier))
        .with_thresholds(thresholds);
    let handle = tokio::spawn(monitor.run(
        Duration::from_secs(config.monitor_interval_secs),
        Duration::from_secs(config.monitor_first_delay_secs),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    handle.await.context("battery monitor task panicked")?;

    let stats = client.get_stats().await;
    info!(
        "Uptime {} | requests {} (ok {}, failed {}) | cached vehicles {}",
        stats.uptime_display(),
        stats.requests_total,
        stats.requests_success,
        stats.requests_failed,
        stats.cache_size
    );

    Ok(())
}

// Re-exports for library consumers: common useful types
pub use client::MyRenaultClient;
pub use config::{AppConfig, Credentials};
pub use error::{Error, ErrorKind};
pub use monitor::{BatteryMonitor, BatteryNotification, LogNotifier, Notifier, Thresholds};
pub use normalize::{BatteryReport, CockpitReport, LocationReport, VehicleOverview};
pub use stats::StatsSnapshot;
