use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::climate::{HvacMode, PresetMode};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `invalid_auth` or `no_devices`.
    pub error: String,
    pub message: String,
}

/// Request body for `POST /setup/location`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LocationStepRequest {
    /// Flow id returned by the user step.
    pub flow_id: Uuid,
    pub location_id: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetTemperatureRequest {
    /// Degrees Celsius; snapped to 0.5 °C.
    pub temperature: f64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetPresetModeRequest {
    /// One of `home`, `away`, `schedule`.
    pub preset_mode: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetHvacModeRequest {
    pub hvac_mode: HvacMode,
}

/// What a command sent to the device.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommandResponse {
    pub device_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset_mode: Option<PresetMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hvac_mode: Option<HvacMode>,
}

impl CommandResponse {
    pub fn for_device(device_id: i64) -> Self {
        Self {
            device_id,
            temperature: None,
            preset_mode: None,
            hvac_mode: None,
        }
    }
}
