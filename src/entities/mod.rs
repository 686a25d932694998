//! Maps polled thermostats onto climate and sensor entities.

pub mod climate;
pub mod sensor;

use serde::Serialize;
use utoipa::ToSchema;

pub const DOMAIN: &str = "schluter_heat";

/// Physical device an entity belongs to.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub sw_version: String,
}

impl DeviceInfo {
    pub fn for_device(device_id: i64, name: &str) -> Self {
        Self {
            identifier: device_id.to_string(),
            name: name.to_owned(),
            manufacturer: "Schluter Systems".to_owned(),
            model: "DITRA-HEAT-E-RS1".to_owned(),
            sw_version: "WiFi Thermostat".to_owned(),
        }
    }
}
