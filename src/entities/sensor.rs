use chrono::{DateTime, Local, NaiveDate, Timelike, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::DeviceInfo;
use crate::{config::FloorConfig, schluter::models::ThermostatStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    HeatingOutput,
    HeatingTime,
    GfciStatus,
    EstimatedPower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GfciState {
    Ok,
    Error,
    Unknown,
}

impl GfciState {
    pub fn from_status(raw: Option<&str>) -> Self {
        match raw {
            Some("ok") => GfciState::Ok,
            Some("error") => GfciState::Error,
            _ => GfciState::Unknown,
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            GfciState::Ok => "mdi:shield-check",
            GfciState::Error => "mdi:shield-alert",
            GfciState::Unknown => "mdi:shield-off",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Status(GfciState),
}

// ---------------------------------------------------------------------------
// Heating time
// ---------------------------------------------------------------------------

/// Accumulated heating time for the current local day.
///
/// Time is only counted between two consecutive samples that both report
/// heating, so a single heating sample never contributes on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeatingTime {
    seconds: f64,
    last_heating: bool,
    last_sample: Option<DateTime<Local>>,
    day: Option<NaiveDate>,
}

impl HeatingTime {
    pub fn record(&mut self, heating: bool, at: DateTime<Local>) {
        let today = at.date_naive();
        if self.day != Some(today) {
            self.seconds = 0.0;
            self.day = Some(today);
        }

        if heating && self.last_heating {
            if let Some(last) = self.last_sample {
                let elapsed = if last.date_naive() == today {
                    (at - last).num_milliseconds() as f64 / 1000.0
                } else {
                    f64::from(at.num_seconds_from_midnight())
                };
                self.seconds += elapsed.max(0.0);
            }
        }

        self.last_heating = heating;
        self.last_sample = Some(at);
    }

    /// Forget the last heating sample. Called when a poll brings no data
    /// for the device, so the gap is never counted.
    pub fn interrupt(&mut self) {
        self.last_heating = false;
    }

    /// Hours heated today, one decimal.
    pub fn hours(&self) -> f64 {
        round1(self.seconds / 3600.0)
    }

    pub fn is_heating(&self) -> bool {
        self.last_heating
    }
}

// ---------------------------------------------------------------------------
// Power estimate
// ---------------------------------------------------------------------------

/// Estimated draw in watts: `area × W/sq ft × heating% / 100`.
///
/// The RS1 has no power metering; this is derived from the configured floor
/// and the reported duty cycle and is typically within 5–10 %.
pub fn estimate_power(heating_percent: u8, floor: Option<FloorConfig>) -> Option<f64> {
    let floor = floor.filter(|f| f.area_sq_ft > 0.0)?;
    let max_power = floor.area_sq_ft * floor.watts_per_sq_ft;
    Some(round1(max_power * f64::from(heating_percent) / 100.0))
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Sensor state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SensorState {
    pub unique_id: String,
    pub device_id: i64,
    pub name: String,
    pub kind: SensorKind,
    pub available: bool,
    pub device_info: DeviceInfo,
    pub native_value: Option<SensorValue>,
    pub unit_of_measurement: Option<String>,
    pub device_class: String,
    pub state_class: Option<String>,
    pub icon: Option<String>,
    #[schema(value_type = Object)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Inputs needed to render the auxiliary sensors of one thermostat.
#[derive(Debug, Clone, Copy)]
pub struct SensorContext<'a> {
    pub status: &'a ThermostatStatus,
    pub heating_time: Option<&'a HeatingTime>,
    pub floor: Option<FloorConfig>,
    pub last_update: Option<DateTime<Utc>>,
    pub available: bool,
}

/// The four read-only sensors exposed for every thermostat.
pub fn sensors_for(ctx: SensorContext<'_>) -> Vec<SensorState> {
    let s = ctx.status;
    let base = |kind: SensorKind, suffix: &str, name: &str| SensorState {
        unique_id: format!("{}_{}_{}", super::DOMAIN, s.device_id, suffix),
        device_id: s.device_id,
        name: name.to_owned(),
        kind,
        available: ctx.available,
        device_info: DeviceInfo::for_device(s.device_id, &s.name),
        native_value: None,
        unit_of_measurement: None,
        device_class: String::new(),
        state_class: None,
        icon: None,
        attributes: serde_json::Map::new(),
    };

    let heating_output = SensorState {
        native_value: Some(SensorValue::Number(f64::from(s.heating_percent))),
        unit_of_measurement: Some("%".to_owned()),
        device_class: "power_factor".to_owned(),
        state_class: Some("measurement".to_owned()),
        ..base(SensorKind::HeatingOutput, "heating", "Heating output")
    };

    let mut heating_time = SensorState {
        native_value: Some(SensorValue::Number(
            ctx.heating_time.map(HeatingTime::hours).unwrap_or_default(),
        )),
        unit_of_measurement: Some("h".to_owned()),
        device_class: "duration".to_owned(),
        state_class: Some("total_increasing".to_owned()),
        ..base(SensorKind::HeatingTime, "heating_time", "Heating time today")
    };
    heating_time.attributes.insert(
        "is_heating".to_owned(),
        ctx.heating_time.is_some_and(HeatingTime::is_heating).into(),
    );
    heating_time.attributes.insert(
        "last_update".to_owned(),
        ctx.last_update
            .map(|t| t.to_rfc3339().into())
            .unwrap_or(serde_json::Value::Null),
    );

    let gfci = GfciState::from_status(s.gfci_status.as_deref());
    let gfci_status = SensorState {
        native_value: Some(SensorValue::Status(gfci)),
        device_class: "enum".to_owned(),
        icon: Some(gfci.icon().to_owned()),
        ..base(SensorKind::GfciStatus, "gfci", "GFCI status")
    };

    let floor = ctx.floor.unwrap_or(FloorConfig {
        area_sq_ft: 0.0,
        watts_per_sq_ft: crate::config::DEFAULT_FLOOR_WATTAGE,
    });
    let mut power = SensorState {
        native_value: estimate_power(s.heating_percent, Some(floor)).map(SensorValue::Number),
        unit_of_measurement: Some("W".to_owned()),
        device_class: "power".to_owned(),
        state_class: Some("measurement".to_owned()),
        ..base(SensorKind::EstimatedPower, "power", "Estimated power")
    };
    power
        .attributes
        .insert("floor_area_sq_ft".to_owned(), floor.area_sq_ft.into());
    power
        .attributes
        .insert("wattage_per_sq_ft".to_owned(), floor.watts_per_sq_ft.into());
    if floor.area_sq_ft > 0.0 {
        power.attributes.insert(
            "max_power_watts".to_owned(),
            (floor.area_sq_ft * floor.watts_per_sq_ft).into(),
        );
    }

    vec![heating_output, heating_time, gfci_status, power]
}
