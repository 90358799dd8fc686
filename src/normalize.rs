//! Flat response shapes handed to presentation layers.
//!
//! Field names are the camelCase keys callers already know; values are passed
//! through from the upstream objects without clamping.

use serde::Serialize;

use crate::upstream::{BatteryStatus, Cockpit, Location};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatteryReport {
    pub battery_level: Option<i64>,
    pub battery_autonomy: Option<i64>,
    pub charging_status: Option<f64>,
    pub plug_status: Option<i64>,
    pub battery_temperature: Option<i64>,
    pub charging_instantaneous_power: Option<f64>,
    pub timestamp: Option<String>,
}

impl From<BatteryStatus> for BatteryReport {
    fn from(status: BatteryStatus) -> Self {
        Self {
            battery_level: status.battery_level,
            battery_autonomy: status.battery_autonomy,
            charging_status: status.charging_status,
            plug_status: status.plug_status,
            battery_temperature: status.battery_temperature,
            charging_instantaneous_power: status.charging_instantaneous_power,
            timestamp: status.timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CockpitReport {
    pub total_mileage: Option<f64>,
}

impl From<Cockpit> for CockpitReport {
    fn from(cockpit: Cockpit) -> Self {
        Self {
            total_mileage: cockpit.total_mileage,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LocationReport {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timestamp: Option<String>,
}

impl From<Location> for LocationReport {
    fn from(location: Location) -> Self {
        Self {
            latitude: location.gps_latitude,
            longitude: location.gps_longitude,
            timestamp: location.last_update_time,
        }
    }
}

/// Battery and cockpit read together.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VehicleOverview {
    pub battery: BatteryReport,
    pub cockpit: CockpitReport,
}
