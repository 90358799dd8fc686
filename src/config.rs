use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Application configuration, loaded from `myrenault.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub locale: String,
    pub vin: Option<String>,
    pub gigya_url: String,
    pub gigya_api_key: String,
    pub kamereon_url: String,
    pub kamereon_api_key: String,
    pub request_timeout_secs: u64,
    pub monitor_interval_secs: u64,
    pub monitor_first_delay_secs: u64,
    pub low_battery_threshold: i64,
    pub charged_threshold: i64,
    pub version_check_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            locale: "fr_FR".to_string(),
            vin: None,
            gigya_url: "https://accounts.eu1.gigya.com".to_string(),
            gigya_api_key: String::new(),
            kamereon_url: "https://api-wired-prod-1-euw1.prod.eu2.kamereon.io".to_string(),
            kamereon_api_key: String::new(),
            request_timeout_secs: 30,
            monitor_interval_secs: 300,
            monitor_first_delay_secs: 10,
            low_battery_threshold: 20,
            charged_threshold: 80,
            version_check_url: "https://crates.io/api/v1/crates/myrenault".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration with the chain: `./myrenault.toml` -> `~/myrenault.toml` -> defaults,
    /// then apply environment overrides.
    pub fn load() -> Self {
        let mut cfg = Self::from_files();
        cfg.apply_env();
        cfg
    }

    fn from_files() -> Self {
        for path in &Self::config_paths() {
            if let Ok(contents) = fs::read_to_string(path) {
                match toml::from_str::<AppConfig>(&contents) {
                    Ok(cfg) => return cfg,
                    Err(e) => {
                        tracing::warn!("failed to parse {}: {}", path.display(), e);
                    }
                }
            }
        }
        Self::default()
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("myrenault.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join("myrenault.toml"));
        }
        paths
    }

    fn apply_env(&mut self) {
        if let Some(vin) = non_empty_env("VEHICLE_VIN") {
            self.vin = Some(vin);
        }
        if let Some(key) = non_empty_env("RENAULT_GIGYA_API_KEY") {
            self.gigya_api_key = key;
        }
        if let Some(key) = non_empty_env("RENAULT_KAMEREON_API_KEY") {
            self.kamereon_api_key = key;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Two-letter country code derived from the locale (`fr_FR` -> `FR`).
    pub fn country(&self) -> String {
        country_code(&self.locale)
    }
}

pub fn country_code(locale: &str) -> String {
    locale
        .rsplit(['_', '-'])
        .next()
        .unwrap_or("FR")
        .to_uppercase()
}

/// Account credentials for the upstream login.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    /// Use the given values, falling back to `RENAULT_EMAIL` / `RENAULT_PASSWORD`.
    pub fn resolve(email: Option<String>, password: Option<String>) -> Result<Self> {
        let email = email
            .filter(|e| !e.is_empty())
            .or_else(|| non_empty_env("RENAULT_EMAIL"));
        let password = password
            .filter(|p| !p.is_empty())
            .or_else(|| non_empty_env("RENAULT_PASSWORD"));

        match (email, password) {
            (Some(email), Some(password)) => Ok(Self { email, password }),
            _ => Err(Error::Configuration(
                "Email and Password must be provided either as arguments or environment variables"
                    .to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
