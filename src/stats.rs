use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;

/// Request counters for one facade instance.
#[derive(Debug)]
pub struct RequestStats {
    started_at: DateTime<Local>,
    started: Instant,
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    #[serde(serialize_with = "as_secs")]
    pub uptime: Duration,
    pub started_at: String,
    pub cache_size: usize,
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
}

impl StatsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.requests_total == 0 {
            return 0.0;
        }
        (self.requests_success as f64 / self.requests_total as f64) * 100.0
    }

    /// Uptime as `HH:MM:SS`, with a day prefix past 24 hours.
    pub fn uptime_display(&self) -> String {
        let secs = self.uptime.as_secs();
        let (days, rem) = (secs / 86_400, secs % 86_400);
        let hms = format!("{:02}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
        if days > 0 {
            format!("{days}d {hms}")
        } else {
            hms
        }
    }
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            started_at: Local::now(),
            started: Instant::now(),
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Run `op`, counting it once in the total and once in success or failed.
    /// The outcome is returned unchanged.
    pub async fn track<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.total.fetch_add(1, Ordering::Relaxed);
        let result = op.await;
        match &result {
            Ok(_) => self.success.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    pub fn snapshot(&self, cache_size: usize) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started.elapsed(),
            started_at: self.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            cache_size,
            requests_total: self.total.load(Ordering::Relaxed),
            requests_success: self.success.load(Ordering::Relaxed),
            requests_failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
