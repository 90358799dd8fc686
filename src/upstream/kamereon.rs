use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{
    Account, BatteryStatus, Cockpit, CommandAck, Connector, Location, UpstreamClient, Vehicle,
    VehicleLink,
};
use crate::config::{country_code, AppConfig};
use crate::error::{Error, Result};
use crate::utils::truncate_body;

// ── Settings ────────────────────────────────────────────────────────────

/// Lifetime requested for the Gigya JWT.
const JWT_EXPIRATION_SECS: u64 = 900;
/// The session reports itself closed this long before the JWT expires.
const JWT_RENEW_MARGIN: Duration = Duration::from_secs(60);

const GIGYA_JWT_FIELDS: &str = "data.personId,data.gigyaDataCenter";
/// Gigya error codes `403xxx` reject the caller's credentials or token.
const GIGYA_FORBIDDEN_CLASS: i64 = 403;
const KAMEREON_CONTENT_TYPE: &str = "application/vnd.api+json";

/// Endpoints and keys for the Gigya identity service and the Kamereon gateway.
#[derive(Debug, Clone)]
pub struct KamereonSettings {
    pub gigya_url: String,
    pub gigya_api_key: String,
    pub kamereon_url: String,
    pub kamereon_api_key: String,
    pub timeout: Duration,
}

impl KamereonSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            gigya_url: config.gigya_url.trim_end_matches('/').to_string(),
            gigya_api_key: config.gigya_api_key.clone(),
            kamereon_url: config.kamereon_url.trim_end_matches('/').to_string(),
            kamereon_api_key: config.kamereon_api_key.clone(),
            timeout: config.request_timeout(),
        }
    }
}

/// Car-adapter API version serving a vehicle endpoint.
fn endpoint_version(path: &str) -> &'static str {
    match path {
        "battery-status" => "v2",
        _ => "v1",
    }
}

// ── Connector ───────────────────────────────────────────────────────────

/// Opens a new HTTP transport per [`Connector::connect`] call.
pub struct KamereonConnector {
    settings: Arc<KamereonSettings>,
}

impl KamereonConnector {
    pub fn new(settings: KamereonSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

#[async_trait]
impl Connector for KamereonConnector {
    async fn connect(&self, locale: &str) -> Result<Arc<dyn UpstreamClient>> {
        let http = reqwest::Client::builder()
            .timeout(self.settings.timeout)
            .build()?;

        Ok(Arc::new(KamereonSession {
            transport: Arc::new(Transport {
                http,
                settings: self.settings.clone(),
                country: country_code(locale),
                auth: RwLock::new(None),
                closed: AtomicBool::new(false),
            }),
        }))
    }
}

// ── Transport ───────────────────────────────────────────────────────────

#[derive(Clone)]
struct AuthState {
    person_id: String,
    id_token: String,
    expires_at: Instant,
}

/// One HTTP client plus the Gigya tokens obtained over it.
struct Transport {
    http: reqwest::Client,
    settings: Arc<KamereonSettings>,
    country: String,
    auth: RwLock<Option<AuthState>>,
    closed: AtomicBool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GigyaStatus {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error_details: Option<String>,
}

impl Transport {
    fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }
        match self.auth.read() {
            Ok(guard) => guard
                .as_ref()
                .is_some_and(|auth| Instant::now() >= auth.expires_at),
            Err(_) => true,
        }
    }

    fn auth(&self) -> Result<AuthState> {
        let guard = self
            .auth
            .read()
            .map_err(|_| Error::Transport("session state poisoned".to_string()))?;
        guard
            .clone()
            .ok_or_else(|| Error::Authentication("session is not logged in".to_string()))
    }

    async fn gigya(&self, method: &str, form: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/{}", self.settings.gigya_url, method);
        debug!("Gigya call {}", method);

        let resp = self.http.post(&url).form(form).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(Error::upstream(status.as_u16(), truncate_body(&text, 500)));
        }

        let value: Value = serde_json::from_str(&text).map_err(|e| {
            Error::upstream(status.as_u16(), format!("invalid Gigya response: {e}"))
        })?;
        let gigya: GigyaStatus = serde_json::from_value(value.clone()).map_err(|e| {
            Error::upstream(status.as_u16(), format!("invalid Gigya response: {e}"))
        })?;

        if gigya.error_code != 0 {
            return Err(gigya_error(gigya));
        }
        Ok(value)
    }

    async fn kamereon(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        let auth = self.auth()?;
        debug!("Kamereon {} {}", method, url);

        let mut req = self
            .http
            .request(method, url)
            .header("apikey", &self.settings.kamereon_api_key)
            .header("x-gigya-id_token", &auth.id_token)
            .header(CONTENT_TYPE, HeaderValue::from_static(KAMEREON_CONTENT_TYPE));
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| Error::upstream(0, format!("cannot encode request body: {e}")))?;
            req = req.body(bytes);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Authentication(kamereon_error_message(&text)));
        }
        if !status.is_success() {
            return Err(Error::upstream(status.as_u16(), kamereon_error_message(&text)));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::upstream(status.as_u16(), format!("invalid Kamereon response: {e}")))
    }

    fn kamereon_url(&self, path: &str) -> String {
        format!(
            "{}/commerce/v1/{}?country={}",
            self.settings.kamereon_url, path, self.country
        )
    }
}

/// Credential rejections become [`Error::Authentication`]; any other Gigya
/// failure is an upstream fault.
fn gigya_error(status: GigyaStatus) -> Error {
    let code = status.error_code;
    let reason = status
        .error_details
        .or(status.error_message)
        .unwrap_or_else(|| "no details".to_string());
    if code / 1000 == GIGYA_FORBIDDEN_CLASS {
        Error::Authentication(reason)
    } else {
        Error::upstream(0, format!("Gigya error {code}: {reason}"))
    }
}

/// Pull the first `errorCode: errorMessage` pair out of a Kamereon error body.
fn kamereon_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let err = v.get("errors")?.get(0)?.clone();
            let code = err.get("errorCode").and_then(Value::as_str).unwrap_or("");
            let message = err.get("errorMessage").and_then(Value::as_str).unwrap_or("");
            Some(format!("{code}: {message}"))
        })
        .unwrap_or_else(|| truncate_body(body, 500))
}

fn attributes<T: DeserializeOwned>(response: Value) -> Result<T> {
    let attrs = response
        .pointer("/data/attributes")
        .cloned()
        .unwrap_or(Value::Null);
    serde_json::from_value(attrs)
        .map_err(|e| Error::upstream(0, format!("unexpected vehicle data shape: {e}")))
}

fn required_str(value: &Value, pointer: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::upstream(0, format!("Gigya response is missing {pointer}")))
}

// ── Session ─────────────────────────────────────────────────────────────

/// Authenticated Kamereon client bound to one transport.
pub struct KamereonSession {
    transport: Arc<Transport>,
}

#[async_trait]
impl UpstreamClient for KamereonSession {
    async fn login(&self, email: &str, password: &str) -> Result<()> {
        let t = &self.transport;
        let api_key = t.settings.gigya_api_key.as_str();
        if api_key.is_empty() {
            return Err(Error::Configuration(
                "Gigya API key is not configured".to_string(),
            ));
        }

        let login = t
            .gigya(
                "accounts.login",
                &[("ApiKey", api_key), ("loginID", email), ("password", password)],
            )
            .await?;
        let login_token = required_str(&login, "/sessionInfo/cookieValue")?;

        let info = t
            .gigya(
                "accounts.getAccountInfo",
                &[("ApiKey", api_key), ("login_token", login_token.as_str())],
            )
            .await?;
        let person_id = required_str(&info, "/data/personId")?;

        let expiration = JWT_EXPIRATION_SECS.to_string();
        let jwt = t
            .gigya(
                "accounts.getJWT",
                &[
                    ("ApiKey", api_key),
                    ("login_token", login_token.as_str()),
                    ("fields", GIGYA_JWT_FIELDS),
                    ("expiration", expiration.as_str()),
                ],
            )
            .await?;
        let id_token = required_str(&jwt, "/id_token")?;

        let expires_at =
            Instant::now() + Duration::from_secs(JWT_EXPIRATION_SECS) - JWT_RENEW_MARGIN;
        let mut guard = t
            .auth
            .write()
            .map_err(|_| Error::Transport("session state poisoned".to_string()))?;
        *guard = Some(AuthState {
            person_id,
            id_token,
            expires_at,
        });
        t.closed.store(false, Ordering::SeqCst);
        info!("Logged in to Renault account");
        Ok(())
    }

    async fn accounts(&self) -> Result<Vec<Arc<dyn Account>>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Person {
            #[serde(default)]
            accounts: Vec<AccountEntry>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct AccountEntry {
            account_id: String,
        }

        let t = &self.transport;
        let person_id = t.auth()?.person_id;
        let url = t.kamereon_url(&format!("persons/{person_id}"));
        let response = t.kamereon(Method::GET, &url, None).await?;
        let person: Person = serde_json::from_value(response)
            .map_err(|e| Error::upstream(0, format!("unexpected person shape: {e}")))?;

        Ok(person
            .accounts
            .into_iter()
            .map(|entry| {
                Arc::new(KamereonAccount {
                    transport: t.clone(),
                    account_id: entry.account_id,
                }) as Arc<dyn Account>
            })
            .collect())
    }

    fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    fn close(&self) {
        self.transport.closed.store(true, Ordering::SeqCst);
    }
}

// ── Account ─────────────────────────────────────────────────────────────

pub struct KamereonAccount {
    transport: Arc<Transport>,
    account_id: String,
}

#[async_trait]
impl Account for KamereonAccount {
    fn id(&self) -> &str {
        &self.account_id
    }

    async fn vehicles(&self) -> Result<Vec<VehicleLink>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Vehicles {
            #[serde(default)]
            vehicle_links: Option<Vec<VehicleLink>>,
        }

        let t = &self.transport;
        let url = t.kamereon_url(&format!("accounts/{}/vehicles", self.account_id));
        let response = t.kamereon(Method::GET, &url, None).await?;
        let vehicles: Vehicles = serde_json::from_value(response)
            .map_err(|e| Error::upstream(0, format!("unexpected vehicle list shape: {e}")))?;
        Ok(vehicles.vehicle_links.unwrap_or_default())
    }

    async fn vehicle(&self, vin: &str) -> Result<Arc<dyn Vehicle>> {
        Ok(Arc::new(KamereonVehicle {
            transport: self.transport.clone(),
            account_id: self.account_id.clone(),
            vin: vin.to_string(),
        }))
    }
}

// ── Vehicle ─────────────────────────────────────────────────────────────

pub struct KamereonVehicle {
    transport: Arc<Transport>,
    account_id: String,
    vin: String,
}

impl KamereonVehicle {
    fn endpoint(&self, path: &str) -> String {
        self.transport.kamereon_url(&format!(
            "accounts/{}/kamereon/kca/car-adapter/{}/cars/{}/{}",
            self.account_id,
            endpoint_version(path),
            self.vin,
            path
        ))
    }

    async fn read<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .transport
            .kamereon(Method::GET, &self.endpoint(path), None)
            .await?;
        attributes(response)
    }

    async fn action(&self, path: &str, kind: &str, attributes: Value) -> Result<CommandAck> {
        let body = json!({
            "data": {
                "type": kind,
                "attributes": attributes,
            }
        });
        let response = self
            .transport
            .kamereon(Method::POST, &self.endpoint(path), Some(&body))
            .await?;
        Ok(CommandAck::from_response(&response))
    }
}

#[async_trait]
impl Vehicle for KamereonVehicle {
    fn vin(&self) -> &str {
        &self.vin
    }

    async fn battery_status(&self) -> Result<BatteryStatus> {
        self.read("battery-status").await
    }

    async fn cockpit(&self) -> Result<Cockpit> {
        self.read("cockpit").await
    }

    async fn location(&self) -> Result<Location> {
        self.read("location").await
    }

    async fn hvac_start(&self, temperature: f64) -> Result<CommandAck> {
        self.action(
            "actions/hvac-start",
            "HvacStart",
            json!({ "action": "start", "targetTemperature": temperature }),
        )
        .await
    }

    async fn hvac_stop(&self) -> Result<CommandAck> {
        self.action("actions/hvac-start", "HvacStart", json!({ "action": "cancel" }))
            .await
    }

    async fn charge_start(&self) -> Result<CommandAck> {
        self.action(
            "actions/charging-start",
            "ChargingStart",
            json!({ "action": "start" }),
        )
        .await
    }

    async fn start_lights(&self) -> Result<CommandAck> {
        self.action(
            "actions/horn-lights",
            "HornLights",
            json!({ "action": "start", "target": "lights" }),
        )
        .await
    }

    async fn start_horn(&self) -> Result<CommandAck> {
        self.action(
            "actions/horn-lights",
            "HornLights",
            json!({ "action": "start", "target": "horn" }),
        )
        .await
    }

    async fn full_endpoint(&self, path: &str) -> Result<String> {
        Ok(self.endpoint(path))
    }

    async fn http_request(&self, method: Method, url: &str, body: Value) -> Result<Value> {
        self.transport.kamereon(method, url, Some(&body)).await
    }
}
