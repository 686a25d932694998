use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

pub const DEFAULT_MIN_TEMP: f64 = 5.0;
pub const DEFAULT_MAX_TEMP: f64 = 33.0;

/// Attributes requested from `GET device/{id}/attribute`.
pub const THERMOSTAT_ATTRIBUTES: &[&str] = &[
    "setpointMode",
    "roomSetpoint",
    "roomSetpointMin",
    "roomSetpointMax",
    "roomTemperatureDisplay",
    "outputPercentDisplay",
    "occupancyMode",
    "gfciStatus",
    "airFloorMode",
    "floorSetpointPwm",
    "floorSetpointPwmMin",
    "floorSetpointPwmMax",
];

// ---------------------------------------------------------------------------
// Login: POST {auth}login
//
// The same endpoint answers both credential logins and refresh-token logins,
// and the field layout differs between app versions:
//
//   credentials:    { "refreshToken": "...", "user": { "id": 1, "account$id": 7 }, ... }
//                   { "session": { "refreshToken": "...", "access_token": "..." }, ... }
//   refresh token:  { "session": "<session id>", "user": {...}, "account": { "id": 7 } }
//
// so these responses are read from a `serde_json::Value` rather than a
// fixed struct.
// ---------------------------------------------------------------------------

const REFRESH_TOKEN_KEYS: &[&str] = &["refreshToken", "refresh_token", "RefreshToken", "REFRESH_TOKEN"];
const NESTED_REFRESH_TOKEN_KEYS: &[&str] = &["refreshToken", "refresh_token"];
const SESSION_ID_KEYS: &[&str] = &["session", "sessionId", "session_id"];

/// Result of exchanging email + password for a long-lived refresh token.
#[derive(Clone)]
pub struct CredentialLogin {
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub user_id: Option<i64>,
    pub account_id: Option<i64>,
}

impl fmt::Debug for CredentialLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLogin")
            .field("refresh_token", &"***")
            .field("user_id", &self.user_id)
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl CredentialLogin {
    /// Extract the refresh token and user info. Returns `None` when no
    /// refresh token is present under any known key.
    pub fn from_response(data: &Value) -> Option<Self> {
        let refresh_token = first_str(data, REFRESH_TOKEN_KEYS).or_else(|| {
            data.get("session")
                .filter(|s| s.is_object())
                .and_then(|s| first_str(s, NESTED_REFRESH_TOKEN_KEYS))
        })?;

        let access_token = first_str(data, &["access_token", "accessToken"]).or_else(|| {
            data.get("session")
                .filter(|s| s.is_object())
                .and_then(|s| first_str(s, &["access_token"]))
        });

        let user = data.get("user");
        Some(Self {
            refresh_token,
            access_token,
            user_id: user.and_then(|u| as_i64(u.get("id"))),
            account_id: user.and_then(|u| {
                as_i64(u.get("account$id")).or_else(|| as_i64(u.get("accountId")))
            }),
        })
    }
}

/// Result of a refresh-token login.
#[derive(Debug, Clone, Default)]
pub struct SessionLogin {
    pub session_id: Option<String>,
    pub access_token: Option<String>,
    pub user_id: Option<i64>,
    pub account_id: Option<i64>,
}

impl SessionLogin {
    pub fn from_response(data: &Value) -> Self {
        let user = data.get("user");
        Self {
            session_id: data.get("session").and_then(Value::as_str).map(str::to_owned),
            access_token: first_str(data, &["access_token"]),
            user_id: user.and_then(|u| as_i64(u.get("id"))),
            account_id: user
                .and_then(|u| as_i64(u.get("account$id")))
                .or_else(|| data.get("account").and_then(|a| as_i64(a.get("id")))),
        }
    }
}

/// Session id from a `POST {auth}connect` response.
pub fn connect_session_id(data: &Value) -> Option<String> {
    first_str(data, SESSION_ID_KEYS)
}

fn first_str(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn as_i64(v: Option<&Value>) -> Option<i64> {
    v.and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
}

/// Copy of a login response that is safe to log: secrets are redacted,
/// arrays are summarised and scalars truncated to 50 characters.
pub fn sanitize(data: &Value) -> Value {
    const SECRET_KEYS: &[&str] = &[
        "password",
        "token",
        "refreshtoken",
        "accesstoken",
        "access_token",
        "refresh_token",
    ];

    match data {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if SECRET_KEYS.contains(&k.to_lowercase().as_str()) {
                        Value::String("***REDACTED***".to_owned())
                    } else {
                        match v {
                            Value::Object(_) => sanitize(v),
                            Value::Array(items) => Value::String(format!("[{} items]", items.len())),
                            Value::String(s) => Value::String(s.chars().take(50).collect()),
                            other => Value::String(other.to_string().chars().take(50).collect()),
                        }
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Locations: GET {base}location
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Location {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

impl Location {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Location {}", self.id))
    }
}

// ---------------------------------------------------------------------------
// Devices: GET {base}devices?location$id={id}
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct DeviceListResponse {
    #[serde(default)]
    pub devices: Vec<DeviceSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSummary {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

impl DeviceSummary {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Device {}", self.id))
    }
}

// ---------------------------------------------------------------------------
// Device attributes: GET/PUT {base}device/{id}/attribute
//
// Observed attributes:
//   setpointMode            String  "manual" | "schedule"
//   roomSetpoint            f64     22.5 (°C)
//   roomSetpointMin/Max     f64     5.0 / 33.0
//   roomTemperatureDisplay  object  { "value": 21.3, "status": "on" }
//   outputPercentDisplay    object  { "percent": 45, ... }
//   occupancyMode           String  "home" | "away"
//   gfciStatus              String  "ok" | "error"
//   airFloorMode            String  "air" | "floor"
//   floorSetpointPwm        number
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    pub setpoint_mode: Option<String>,
    pub room_setpoint: Option<f64>,
    pub room_setpoint_min: Option<f64>,
    pub room_setpoint_max: Option<f64>,
    pub room_temperature_display: Option<TemperatureDisplay>,
    pub output_percent_display: Option<OutputPercentDisplay>,
    pub occupancy_mode: Option<String>,
    pub gfci_status: Option<String>,
    pub air_floor_mode: Option<String>,
    pub floor_setpoint_pwm: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TemperatureDisplay {
    pub value: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputPercentDisplay {
    pub percent: Option<f64>,
}

/// Echo of a `PUT device/{id}/attribute` carrying a new setpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetpointResponse {
    pub room_setpoint: Option<f64>,
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SetpointMode {
    Manual,
    Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyMode {
    Home,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AirFloorMode {
    Air,
    Floor,
}

macro_rules! wire_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> anyhow::Result<Self> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(anyhow::anyhow!(
                        concat!("unknown ", stringify!($ty), ": {:?}"),
                        other
                    )),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(SetpointMode { Manual => "manual", Schedule => "schedule" });
wire_enum!(OccupancyMode { Home => "home", Away => "away" });
wire_enum!(AirFloorMode { Air => "air", Floor => "floor" });

// ---------------------------------------------------------------------------
// ThermostatStatus
// ---------------------------------------------------------------------------

/// Typed view of one RS1 thermostat, built from an attribute response.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatStatus {
    pub device_id: i64,
    pub name: String,
    /// Room (or floor, see `air_floor_mode`) temperature in °C.
    pub current_temp: Option<f64>,
    pub target_temp: Option<f64>,
    pub min_temp: f64,
    pub max_temp: f64,
    pub setpoint_mode: Option<SetpointMode>,
    pub occupancy_mode: Option<OccupancyMode>,
    /// `true` whenever the controller reports any output.
    pub heating: bool,
    /// Output duty, 0–100.
    pub heating_percent: u8,
    pub air_floor_mode: Option<AirFloorMode>,
    /// Raw GFCI status string as reported, usually `"ok"` or `"error"`.
    pub gfci_status: Option<String>,
    pub floor_setpoint_pwm: Option<f64>,
    pub temp_display_status: Option<String>,
}

impl ThermostatStatus {
    pub fn from_attributes(device_id: i64, name: impl Into<String>, attrs: DeviceAttributes) -> Self {
        let percent = attrs
            .output_percent_display
            .and_then(|o| o.percent)
            .unwrap_or_default();
        let heating_percent = if percent.is_finite() {
            percent.round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        let (current_temp, temp_display_status) = match attrs.room_temperature_display {
            Some(d) => (d.value, d.status),
            None => (None, None),
        };

        Self {
            device_id,
            name: name.into(),
            current_temp,
            target_temp: attrs.room_setpoint,
            min_temp: attrs.room_setpoint_min.unwrap_or(DEFAULT_MIN_TEMP),
            max_temp: attrs.room_setpoint_max.unwrap_or(DEFAULT_MAX_TEMP),
            setpoint_mode: attrs.setpoint_mode.as_deref().and_then(|s| s.parse().ok()),
            occupancy_mode: attrs.occupancy_mode.as_deref().and_then(|s| s.parse().ok()),
            heating: heating_percent > 0,
            heating_percent,
            air_floor_mode: attrs.air_floor_mode.as_deref().and_then(|s| s.parse().ok()),
            gfci_status: attrs.gfci_status,
            floor_setpoint_pwm: attrs.floor_setpoint_pwm,
            temp_display_status,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
