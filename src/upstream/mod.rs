//! Upstream vehicle-API seam.
//!
//! The facade only talks to these traits. [`kamereon`] implements them over
//! HTTP; tests substitute in-memory fakes.

pub mod kamereon;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

pub use kamereon::KamereonConnector;

/// Opens new transport sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Create a fresh transport and an unauthenticated client bound to `locale`.
    async fn connect(&self, locale: &str) -> Result<Arc<dyn UpstreamClient>>;
}

/// An upstream client bound to one transport session.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<()>;

    async fn accounts(&self) -> Result<Vec<Arc<dyn Account>>>;

    /// Whether the underlying transport can no longer be used.
    fn is_closed(&self) -> bool;

    fn close(&self);
}

#[async_trait]
pub trait Account: Send + Sync {
    fn id(&self) -> &str;

    async fn vehicles(&self) -> Result<Vec<VehicleLink>>;

    /// Account-scoped handle for `vin`. Does not check that the account owns it.
    async fn vehicle(&self, vin: &str) -> Result<Arc<dyn Vehicle>>;
}

#[async_trait]
pub trait Vehicle: Send + Sync {
    fn vin(&self) -> &str;

    async fn battery_status(&self) -> Result<BatteryStatus>;
    async fn cockpit(&self) -> Result<Cockpit>;
    async fn location(&self) -> Result<Location>;

    async fn hvac_start(&self, temperature: f64) -> Result<CommandAck>;
    async fn hvac_stop(&self) -> Result<CommandAck>;
    async fn charge_start(&self) -> Result<CommandAck>;
    async fn start_lights(&self) -> Result<CommandAck>;
    async fn start_horn(&self) -> Result<CommandAck>;

    /// Absolute URL of a vehicle endpoint such as `actions/charge-stop`.
    async fn full_endpoint(&self, path: &str) -> Result<String>;

    /// Raw authenticated request against a vehicle endpoint.
    async fn http_request(&self, method: reqwest::Method, url: &str, body: Value)
        -> Result<Value>;
}

// ── Wire shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleLink {
    pub vin: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatteryStatus {
    pub timestamp: Option<String>,
    pub battery_level: Option<i64>,
    pub battery_temperature: Option<i64>,
    pub battery_autonomy: Option<i64>,
    pub battery_capacity: Option<i64>,
    pub battery_available_energy: Option<f64>,
    pub plug_status: Option<i64>,
    pub charging_status: Option<f64>,
    pub charging_remaining_time: Option<i64>,
    pub charging_instantaneous_power: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cockpit {
    pub total_mileage: Option<f64>,
    pub fuel_autonomy: Option<f64>,
    pub fuel_quantity: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub last_update_time: Option<String>,
}

/// Acknowledgment payload returned by an action endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CommandAck {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub attributes: Value,
}

impl CommandAck {
    /// Parse the `data` member of a Kamereon action response.
    pub fn parse(response: &Value) -> Result<Self> {
        let data = response
            .get("data")
            .cloned()
            .ok_or_else(|| Error::upstream(0, "action response has no data member"))?;
        serde_json::from_value(data)
            .map_err(|e| Error::upstream(0, format!("unexpected action response shape: {e}")))
    }

    /// Like [`CommandAck::parse`], but an unreadable response yields an empty
    /// ack. The action was accepted upstream either way.
    pub fn from_response(response: &Value) -> Self {
        Self::parse(response).unwrap_or_else(|e| {
            warn!("Action accepted with an unreadable acknowledgment: {}", e);
            Self::default()
        })
    }
}
