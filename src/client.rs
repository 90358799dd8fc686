use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::{AppConfig, Credentials};
use crate::error::{Error, Result};
use crate::normalize::{BatteryReport, CockpitReport, LocationReport, VehicleOverview};
use crate::resolver::resolve_vehicle;
use crate::stats::{RequestStats, StatsSnapshot};
use crate::upstream::kamereon::{KamereonConnector, KamereonSettings};
use crate::upstream::{CommandAck, Connector, UpstreamClient, Vehicle};
use crate::utils::normalize_vin;

const DEFAULT_LOCALE: &str = "fr_FR";
const DEFAULT_VERSION_CHECK_URL: &str = "https://crates.io/api/v1/crates/myrenault";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const CHARGE_STOP_ENDPOINT: &str = "actions/charge-stop";
const UNKNOWN_VERSION: &str = "Unknown";
const INSTALLED_VERSION: &str = env!("CARGO_PKG_VERSION");
const USER_AGENT: &str = concat!("myrenault/", env!("CARGO_PKG_VERSION"));

/// Session and vehicle cache, guarded together so a cache entry never
/// outlives the transport it was resolved on.
#[derive(Default)]
struct SessionState {
    client: Option<Arc<dyn UpstreamClient>>,
    vehicles: HashMap<String, Arc<dyn Vehicle>>,
}

impl SessionState {
    fn is_open(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.is_closed())
    }
}

/// Authenticated, cached access to the vehicles of one Renault login.
///
/// Every vehicle operation is counted in [`MyRenaultClient::get_stats`]. The
/// facade is `Send + Sync`; session creation and cache population are
/// serialized behind one lock. Stats never take that lock.
pub struct MyRenaultClient {
    credentials: Credentials,
    connector: Arc<dyn Connector>,
    locale: String,
    version_check_url: String,
    request_timeout: Duration,
    state: Mutex<SessionState>,
    /// Mirror of `state.vehicles.len()`, updated with every cache change.
    cache_size: AtomicUsize,
    stats: RequestStats,
}

impl MyRenaultClient {
    pub fn new(credentials: Credentials, connector: Arc<dyn Connector>) -> Self {
        Self {
            credentials,
            connector,
            locale: DEFAULT_LOCALE.to_string(),
            version_check_url: DEFAULT_VERSION_CHECK_URL.to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            state: Mutex::new(SessionState::default()),
            cache_size: AtomicUsize::new(0),
            stats: RequestStats::new(),
        }
    }

    /// Build a facade over the Kamereon API. Missing credentials fall back to
    /// `RENAULT_EMAIL` / `RENAULT_PASSWORD`.
    pub fn from_config(
        config: &AppConfig,
        email: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let credentials = Credentials::resolve(email, password)?;
        let connector = Arc::new(KamereonConnector::new(KamereonSettings::from_config(config)));
        Ok(Self::new(credentials, connector)
            .with_locale(&config.locale)
            .with_version_check_url(&config.version_check_url)
            .with_request_timeout(config.request_timeout()))
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.locale = locale.to_string();
        self
    }

    pub fn with_version_check_url(mut self, url: &str) -> Self {
        self.version_check_url = url.to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    // ── Session & cache ─────────────────────────────────────────────────

    /// Return the authenticated upstream client, reconnecting and logging in
    /// when there is none or its transport has closed.
    pub async fn get_session(&self) -> Result<Arc<dyn UpstreamClient>> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state).await
    }

    async fn ensure_session(&self, state: &mut SessionState) -> Result<Arc<dyn UpstreamClient>> {
        if let Some(client) = state.client.as_ref().filter(|c| !c.is_closed()) {
            return Ok(client.clone());
        }
        if state.client.take().is_some() {
            debug!("Transport closed, opening a new session");
            self.clear_cache(state);
        }

        let client = self.connector.connect(&self.locale).await?;
        client
            .login(&self.credentials.email, &self.credentials.password)
            .await?;
        state.client = Some(client.clone());
        Ok(client)
    }

    /// Resolve `vin` to a vehicle handle, from the cache when the transport is
    /// still open.
    ///
    /// A cached entry found on a closed transport drops the whole cache.
    pub async fn get_vehicle(&self, vin: &str) -> Result<Arc<dyn Vehicle>> {
        let vin = normalize_vin(vin);
        let mut state = self.state.lock().await;

        let cached = state.vehicles.get(&vin).cloned();
        if let Some(vehicle) = cached {
            if state.is_open() {
                return Ok(vehicle);
            }
            debug!(
                "Transport closed, invalidating {} cached vehicles",
                state.vehicles.len()
            );
            self.clear_cache(&mut state);
        }

        let client = self.ensure_session(&mut state).await?;
        let vehicle = resolve_vehicle(client.as_ref(), &vin).await?;
        state.vehicles.insert(vin, vehicle.clone());
        self.cache_size.store(state.vehicles.len(), Ordering::SeqCst);
        Ok(vehicle)
    }

    fn clear_cache(&self, state: &mut SessionState) {
        state.vehicles.clear();
        self.cache_size.store(0, Ordering::SeqCst);
    }

    /// Close the current transport. The next call reconnects.
    pub async fn close(&self) {
        let state = self.state.lock().await;
        if let Some(client) = &state.client {
            client.close();
        }
    }

    async fn with_vehicle<T, F, Fut>(&self, vin: &str, op: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Vehicle>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats
            .track(async {
                let vehicle = self.get_vehicle(vin).await?;
                op(vehicle).await
            })
            .await
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub async fn battery_status(&self, vin: &str) -> Result<BatteryReport> {
        let status = self
            .with_vehicle(vin, |v| async move { v.battery_status().await })
            .await?;
        let report = BatteryReport::from(status);
        info!("Battery status collected: {:?}", report);
        Ok(report)
    }

    pub async fn cockpit(&self, vin: &str) -> Result<CockpitReport> {
        let cockpit = self
            .with_vehicle(vin, |v| async move { v.cockpit().await })
            .await?;
        let report = CockpitReport::from(cockpit);
        info!("Cockpit data collected: {:?}", report);
        Ok(report)
    }

    pub async fn location(&self, vin: &str) -> Result<LocationReport> {
        let location = self
            .with_vehicle(vin, |v| async move { v.location().await })
            .await?;
        let report = LocationReport::from(location);
        info!("Location collected: {:?}", report);
        Ok(report)
    }

    /// Battery and cockpit read concurrently once the vehicle is cached.
    pub async fn overview(&self, vin: &str) -> Result<VehicleOverview> {
        self.get_vehicle(vin).await?;
        let (battery, cockpit) = tokio::try_join!(self.battery_status(vin), self.cockpit(vin))?;
        Ok(VehicleOverview { battery, cockpit })
    }

    // ── Commands ────────────────────────────────────────────────────────

    pub async fn hvac_start(&self, vin: &str, temperature: f64) -> Result<CommandAck> {
        self.with_vehicle(vin, |v| async move { v.hvac_start(temperature).await })
            .await
    }

    pub async fn hvac_stop(&self, vin: &str) -> Result<CommandAck> {
        self.with_vehicle(vin, |v| async move { v.hvac_stop().await })
            .await
    }

    pub async fn charge_start(&self, vin: &str) -> Result<CommandAck> {
        self.with_vehicle(vin, |v| async move { v.charge_start().await })
            .await
    }

    /// Stop charging with a `cancel` action.
    ///
    /// Some models (Zoe phase 2) reject the default `stop` action with
    /// `invalid-body-format`, so the body is built here and sent through the
    /// vehicle's authenticated transport.
    pub async fn charge_stop(&self, vin: &str) -> Result<CommandAck> {
        self.with_vehicle(vin, |v| async move {
            let endpoint = v.full_endpoint(CHARGE_STOP_ENDPOINT).await?;
            let response = v
                .http_request(Method::POST, &endpoint, charge_cancel_body())
                .await?;
            Ok::<_, Error>(CommandAck::from_response(&response))
        })
        .await
    }

    pub async fn blink_lights(&self, vin: &str) -> Result<CommandAck> {
        self.with_vehicle(vin, |v| async move { v.start_lights().await })
            .await
    }

    pub async fn honk(&self, vin: &str) -> Result<CommandAck> {
        self.with_vehicle(vin, |v| async move { v.start_horn().await })
            .await
    }

    // ── Diagnostics ─────────────────────────────────────────────────────

    /// Counters and cache size. Returns immediately, even while another
    /// task is resolving a vehicle.
    pub async fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.cache_size.load(Ordering::SeqCst))
    }

    /// `(installed, latest)` crate versions. Never fails: unreachable or
    /// unreadable registry answers yield `"Unknown"`.
    pub async fn check_api_version(&self) -> (String, String) {
        match self.fetch_latest_version().await {
            Ok(Some(latest)) => (INSTALLED_VERSION.to_string(), latest),
            Ok(None) => (INSTALLED_VERSION.to_string(), UNKNOWN_VERSION.to_string()),
            Err(e) => {
                error!("Failed to check version: {}", e);
                (UNKNOWN_VERSION.to_string(), UNKNOWN_VERSION.to_string())
            }
        }
    }

    async fn fetch_latest_version(&self) -> Result<Option<String>> {
        let http = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        let resp = http.get(&self.version_check_url).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }

        let body: Value = resp.json().await?;
        body.pointer("/crate/max_version")
            .and_then(Value::as_str)
            .map(|v| Some(v.to_string()))
            .ok_or_else(|| Error::upstream(0, "registry response has no crate.max_version"))
    }
}

fn charge_cancel_body() -> Value {
    json!({
        "data": {
            "type": "ChargingStart",
            "attributes": {
                "action": "cancel",
            },
        }
    })
}
