//! Periodic battery check with threshold-crossing notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::client::MyRenaultClient;
use crate::config::AppConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatteryNotification {
    /// The level fell through the low threshold.
    Low { level: i64 },
    /// The level rose through the charged threshold.
    Charged { level: i64 },
}

impl BatteryNotification {
    pub fn message(&self) -> String {
        match self {
            Self::Low { level } => format!("Low battery: {level}%"),
            Self::Charged { level } => format!("Battery charged to {level}%"),
        }
    }
}

/// Low and charged battery levels, with `low < charged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    low: i64,
    charged: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { low: 20, charged: 80 }
    }
}

impl Thresholds {
    pub fn new(low: i64, charged: i64) -> Result<Self> {
        if low >= charged {
            return Err(Error::Configuration(format!(
                "low battery threshold ({low}) must be below the charged threshold ({charged})"
            )));
        }
        Ok(Self { low, charged })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(config.low_battery_threshold, config.charged_threshold)
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn charged(&self) -> i64 {
        self.charged
    }

    /// The notification due for a move from `previous` to `current`, if any.
    /// With `low < charged` a single move never crosses both thresholds.
    pub fn crossing(&self, previous: i64, current: i64) -> Option<BatteryNotification> {
        if previous > self.low && current <= self.low {
            Some(BatteryNotification::Low { level: current })
        } else if previous < self.charged && current >= self.charged {
            Some(BatteryNotification::Charged { level: current })
        } else {
            None
        }
    }
}

/// Delivers monitor notifications to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, vin: &str, notification: &BatteryNotification) -> Result<()>;
}

/// Emits notifications as log events.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, vin: &str, notification: &BatteryNotification) -> Result<()> {
        match notification {
            BatteryNotification::Low { .. } => warn!(vin, "{}", notification.message()),
            BatteryNotification::Charged { .. } => info!(vin, "{}", notification.message()),
        }
        Ok(())
    }
}

pub struct BatteryMonitor {
    client: Arc<MyRenaultClient>,
    vin: String,
    notifier: Arc<dyn Notifier>,
    thresholds: Thresholds,
    last_level: Option<i64>,
}

impl BatteryMonitor {
    pub fn new(client: Arc<MyRenaultClient>, vin: &str, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            client,
            vin: vin.to_string(),
            notifier,
            thresholds: Thresholds::default(),
            last_level: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn last_level(&self) -> Option<i64> {
        self.last_level
    }

    /// Read the battery once and notify on a threshold crossing.
    ///
    /// Failures are logged, never returned.
    pub async fn check_battery(&mut self) -> Option<BatteryNotification> {
        let report = match self.client.battery_status(&self.vin).await {
            Ok(report) => report,
            Err(e) => {
                error!("Monitor error: {}", e);
                return None;
            }
        };

        let level = report.battery_level?;
        let previous = self.last_level.replace(level)?;
        let notification = self.thresholds.crossing(previous, level)?;

        if let Err(e) = self.notifier.notify(&self.vin, &notification).await {
            error!("Failed to deliver battery notification: {}", e);
        }
        Some(notification)
    }

    /// Check every `every`, starting after `first_delay`, until `shutdown`
    /// changes or its sender is dropped.
    pub async fn run(
        mut self,
        every: Duration,
        first_delay: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + first_delay, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Battery monitor started for {} (every {}s)",
            self.vin,
            every.as_secs()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_battery().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Battery monitor stopped");
    }
}
