//! In-memory upstream used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::upstream::{
    Account, BatteryStatus, Cockpit, CommandAck, Connector, Location, UpstreamClient, Vehicle,
    VehicleLink,
};

/// A raw request captured by [`FakeVehicle::http_request`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub body: Value,
}

/// Behaviour shared by every vehicle handle an account hands out.
#[derive(Default)]
pub struct VehicleScript {
    battery_levels: Mutex<VecDeque<Option<i64>>>,
    fail_reads: AtomicBool,
    fail_commands: AtomicBool,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct FakeAccount {
    id: String,
    vins: Vec<String>,
    failing: bool,
    list_calls: AtomicUsize,
    handle_calls: AtomicUsize,
    listing_delay_ms: AtomicU64,
    pub script: Arc<VehicleScript>,
}

impl FakeAccount {
    pub fn new(id: &str, vins: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            vins: vins.iter().map(|v| v.to_string()).collect(),
            failing: false,
            list_calls: AtomicUsize::new(0),
            handle_calls: AtomicUsize::new(0),
            listing_delay_ms: AtomicU64::new(0),
            script: Arc::default(),
        })
    }

    /// An account whose vehicle listing always fails.
    pub fn failing(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            vins: Vec::new(),
            failing: true,
            list_calls: AtomicUsize::new(0),
            handle_calls: AtomicUsize::new(0),
            listing_delay_ms: AtomicU64::new(0),
            script: Arc::default(),
        })
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn handle_calls(&self) -> usize {
        self.handle_calls.load(Ordering::SeqCst)
    }

    /// Queue battery levels returned by successive `battery_status` calls.
    pub fn push_battery_levels(&self, levels: &[Option<i64>]) {
        self.script
            .battery_levels
            .lock()
            .unwrap()
            .extend(levels.iter().copied());
    }

    /// Make every vehicle listing take `delay`.
    pub fn delay_listing(&self, delay: Duration) {
        self.listing_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.script.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commands(&self, fail: bool) {
        self.script.fail_commands.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Account for FakeAccount {
    fn id(&self) -> &str {
        &self.id
    }

    async fn vehicles(&self) -> Result<Vec<VehicleLink>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.listing_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing {
            return Err(Error::upstream(500, "vehicle listing failed"));
        }
        Ok(self
            .vins
            .iter()
            .map(|vin| VehicleLink {
                vin: Some(vin.clone()),
                ..Default::default()
            })
            .collect())
    }

    async fn vehicle(&self, vin: &str) -> Result<Arc<dyn Vehicle>> {
        self.handle_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeVehicle {
            account_id: self.id.clone(),
            vin: vin.to_string(),
            script: self.script.clone(),
        }))
    }
}

pub struct FakeVehicle {
    account_id: String,
    vin: String,
    script: Arc<VehicleScript>,
}

impl FakeVehicle {
    fn check_reads(&self) -> Result<()> {
        if self.script.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::upstream(500, "read failed"));
        }
        Ok(())
    }

    fn command(&self, kind: &str, action: &str) -> Result<CommandAck> {
        if self.script.fail_commands.load(Ordering::SeqCst) {
            return Err(Error::upstream(400, "command rejected"));
        }
        Ok(CommandAck {
            kind: Some(kind.to_string()),
            id: Some(self.vin.clone()),
            attributes: json!({ "action": action }),
        })
    }
}

#[async_trait]
impl Vehicle for FakeVehicle {
    fn vin(&self) -> &str {
        &self.vin
    }

    async fn battery_status(&self) -> Result<BatteryStatus> {
        self.check_reads()?;
        let level = self
            .script
            .battery_levels
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Some(50));
        Ok(BatteryStatus {
            timestamp: Some("2023-01-01T00:00:00Z".to_string()),
            battery_level: level,
            battery_autonomy: Some(200),
            charging_status: Some(0.0),
            plug_status: Some(0),
            battery_temperature: Some(25),
            charging_instantaneous_power: Some(0.0),
            ..Default::default()
        })
    }

    async fn cockpit(&self) -> Result<Cockpit> {
        self.check_reads()?;
        Ok(Cockpit {
            total_mileage: Some(12345.6),
            ..Default::default()
        })
    }

    async fn location(&self) -> Result<Location> {
        self.check_reads()?;
        Ok(Location {
            gps_latitude: Some(48.85),
            gps_longitude: Some(2.35),
            last_update_time: Some("2023-01-01T10:00:00Z".to_string()),
        })
    }

    async fn hvac_start(&self, temperature: f64) -> Result<CommandAck> {
        let mut ack = self.command("HvacStart", "start")?;
        ack.attributes["targetTemperature"] = json!(temperature);
        Ok(ack)
    }

    async fn hvac_stop(&self) -> Result<CommandAck> {
        self.command("HvacStart", "cancel")
    }

    async fn charge_start(&self) -> Result<CommandAck> {
        self.command("ChargingStart", "start")
    }

    async fn start_lights(&self) -> Result<CommandAck> {
        self.command("HornLights", "lights")
    }

    async fn start_horn(&self) -> Result<CommandAck> {
        self.command("HornLights", "horn")
    }

    async fn full_endpoint(&self, path: &str) -> Result<String> {
        Ok(format!(
            "https://kamereon.test/accounts/{}/cars/{}/{}",
            self.account_id, self.vin, path
        ))
    }

    async fn http_request(&self, method: Method, url: &str, body: Value) -> Result<Value> {
        self.script.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            body: body.clone(),
        });
        if self.script.fail_commands.load(Ordering::SeqCst) {
            return Err(Error::upstream(400, "err.func.wired.invalid-body-format"));
        }
        Ok(json!({ "data": { "type": body["data"]["type"], "id": "ack", "attributes": body["data"]["attributes"] } }))
    }
}

/// Upstream client over a fixed set of accounts.
pub struct FakeUpstream {
    accounts: Vec<Arc<FakeAccount>>,
    closed: AtomicBool,
    fail_accounts: AtomicBool,
    reject_login: bool,
    accounts_calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn new(accounts: Vec<Arc<FakeAccount>>) -> Self {
        Self {
            accounts,
            closed: AtomicBool::new(false),
            fail_accounts: AtomicBool::new(false),
            reject_login: false,
            accounts_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_accounts(&self) {
        self.fail_accounts.store(true, Ordering::SeqCst);
    }

    pub fn accounts_calls(&self) -> usize {
        self.accounts_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn login(&self, _email: &str, _password: &str) -> Result<()> {
        if self.reject_login {
            return Err(Error::Authentication("invalid loginID or password".to_string()));
        }
        Ok(())
    }

    async fn accounts(&self) -> Result<Vec<Arc<dyn Account>>> {
        self.accounts_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_accounts.load(Ordering::SeqCst) {
            return Err(Error::upstream(500, "accounts unavailable"));
        }
        Ok(self
            .accounts
            .iter()
            .map(|a| a.clone() as Arc<dyn Account>)
            .collect())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out a new [`FakeUpstream`] per connection, all over the same accounts.
pub struct FakeConnector {
    accounts: Vec<Arc<FakeAccount>>,
    reject_login: bool,
    connects: AtomicUsize,
    locales: Mutex<Vec<String>>,
    sessions: Mutex<Vec<Arc<FakeUpstream>>>,
}

impl FakeConnector {
    pub fn new(accounts: Vec<Arc<FakeAccount>>) -> Arc<Self> {
        Arc::new(Self {
            accounts,
            reject_login: false,
            connects: AtomicUsize::new(0),
            locales: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn rejecting_login() -> Arc<Self> {
        Arc::new(Self {
            accounts: Vec::new(),
            reject_login: true,
            connects: AtomicUsize::new(0),
            locales: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn locales(&self) -> Vec<String> {
        self.locales.lock().unwrap().clone()
    }

    /// The most recently opened session.
    pub fn last_session(&self) -> Arc<FakeUpstream> {
        self.sessions.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, locale: &str) -> Result<Arc<dyn UpstreamClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.locales.lock().unwrap().push(locale.to_string());
        let mut session = FakeUpstream::new(self.accounts.clone());
        session.reject_login = self.reject_login;
        let session = Arc::new(session);
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}
