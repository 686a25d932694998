use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::DeviceInfo;
use crate::schluter::models::{
    AirFloorMode, OccupancyMode, SetpointMode, ThermostatStatus, DEFAULT_MAX_TEMP,
    DEFAULT_MIN_TEMP,
};

pub const TEMP_STEP: f64 = 0.5;
/// Setpoint applied when switching to heat from an off (minimum) setpoint.
pub const COMFORT_TEMP: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Heat,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HvacAction {
    Heating,
    Idle,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PresetMode {
    Home,
    Away,
    Schedule,
}

impl PresetMode {
    pub const ALL: [PresetMode; 3] = [PresetMode::Home, PresetMode::Away, PresetMode::Schedule];

    pub fn as_str(self) -> &'static str {
        match self {
            PresetMode::Home => "home",
            PresetMode::Away => "away",
            PresetMode::Schedule => "schedule",
        }
    }
}

impl FromStr for PresetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| s.to_owned())
    }
}

impl fmt::Display for PresetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Climate entity view of a thermostat.
#[derive(Debug, Clone, Copy)]
pub struct Climate<'a> {
    status: &'a ThermostatStatus,
}

impl<'a> Climate<'a> {
    pub fn new(status: &'a ThermostatStatus) -> Self {
        Self { status }
    }

    pub fn unique_id(&self) -> String {
        format!("{}_{}", super::DOMAIN, self.status.device_id)
    }

    /// Heat whenever the setpoint sits above the minimum; the RS1 has no
    /// separate power switch, so "off" is the minimum setpoint.
    pub fn hvac_mode(&self) -> HvacMode {
        match self.status.target_temp {
            Some(t) if t > DEFAULT_MIN_TEMP => HvacMode::Heat,
            _ => HvacMode::Off,
        }
    }

    pub fn hvac_action(&self) -> HvacAction {
        if self.status.heating {
            HvacAction::Heating
        } else if self.hvac_mode() == HvacMode::Heat {
            HvacAction::Idle
        } else {
            HvacAction::Off
        }
    }

    pub fn preset_mode(&self) -> PresetMode {
        if self.status.setpoint_mode == Some(SetpointMode::Schedule) {
            PresetMode::Schedule
        } else if self.status.occupancy_mode == Some(OccupancyMode::Away) {
            PresetMode::Away
        } else {
            PresetMode::Home
        }
    }

    pub fn min_temp(&self) -> f64 {
        non_zero_or(self.status.min_temp, DEFAULT_MIN_TEMP)
    }

    pub fn max_temp(&self) -> f64 {
        non_zero_or(self.status.max_temp, DEFAULT_MAX_TEMP)
    }

    pub fn state(&self, available: bool) -> ClimateState {
        let s = self.status;
        ClimateState {
            unique_id: self.unique_id(),
            device_id: s.device_id,
            name: s.name.clone(),
            available,
            device_info: DeviceInfo::for_device(s.device_id, &s.name),
            temperature_unit: "°C".to_owned(),
            current_temperature: s.current_temp,
            target_temperature: s.target_temp,
            target_temperature_step: TEMP_STEP,
            min_temp: self.min_temp(),
            max_temp: self.max_temp(),
            hvac_mode: self.hvac_mode(),
            hvac_modes: vec![HvacMode::Heat, HvacMode::Off],
            hvac_action: self.hvac_action(),
            preset_mode: self.preset_mode(),
            preset_modes: PresetMode::ALL.to_vec(),
            attributes: ClimateAttributes {
                setpoint_mode: s.setpoint_mode,
                heating_percent: s.heating_percent,
                gfci_status: s.gfci_status.clone(),
                air_floor_mode: s.air_floor_mode,
            },
        }
    }
}

fn non_zero_or(v: f64, default: f64) -> f64 {
    if v == 0.0 || !v.is_finite() {
        default
    } else {
        v
    }
}

/// Serialisable snapshot of a climate entity.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClimateState {
    pub unique_id: String,
    pub device_id: i64,
    pub name: String,
    pub available: bool,
    pub device_info: DeviceInfo,
    pub temperature_unit: String,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub target_temperature_step: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    pub hvac_mode: HvacMode,
    pub hvac_modes: Vec<HvacMode>,
    pub hvac_action: HvacAction,
    pub preset_mode: PresetMode,
    pub preset_modes: Vec<PresetMode>,
    pub attributes: ClimateAttributes,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClimateAttributes {
    pub setpoint_mode: Option<SetpointMode>,
    pub heating_percent: u8,
    pub gfci_status: Option<String>,
    pub air_floor_mode: Option<AirFloorMode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schluter::models::DeviceAttributes;

    fn status() -> ThermostatStatus {
        ThermostatStatus::from_attributes(1001, "Bathroom", DeviceAttributes::default())
    }

    #[test]
    fn hvac_mode_follows_setpoint() {
        let mut s = status();
        s.target_temp = Some(21.0);
        assert_eq!(Climate::new(&s).hvac_mode(), HvacMode::Heat);

        s.target_temp = Some(DEFAULT_MIN_TEMP);
        assert_eq!(Climate::new(&s).hvac_mode(), HvacMode::Off);

        s.target_temp = None;
        assert_eq!(Climate::new(&s).hvac_mode(), HvacMode::Off);
    }

    #[test]
    fn hvac_action_heating_idle_off() {
        let mut s = status();
        s.target_temp = Some(21.0);
        s.heating = true;
        assert_eq!(Climate::new(&s).hvac_action(), HvacAction::Heating);

        s.heating = false;
        assert_eq!(Climate::new(&s).hvac_action(), HvacAction::Idle);

        s.target_temp = Some(5.0);
        assert_eq!(Climate::new(&s).hvac_action(), HvacAction::Off);
    }

    #[test]
    fn preset_schedule_wins_over_occupancy() {
        let mut s = status();
        s.setpoint_mode = Some(SetpointMode::Schedule);
        s.occupancy_mode = Some(OccupancyMode::Away);
        assert_eq!(Climate::new(&s).preset_mode(), PresetMode::Schedule);

        s.setpoint_mode = Some(SetpointMode::Manual);
        assert_eq!(Climate::new(&s).preset_mode(), PresetMode::Away);

        s.occupancy_mode = None;
        assert_eq!(Climate::new(&s).preset_mode(), PresetMode::Home);
    }

    #[test]
    fn zero_limits_fall_back_to_defaults() {
        let mut s = status();
        s.min_temp = 0.0;
        s.max_temp = 0.0;
        let c = Climate::new(&s);
        assert_eq!(c.min_temp(), DEFAULT_MIN_TEMP);
        assert_eq!(c.max_temp(), DEFAULT_MAX_TEMP);
    }

    #[test]
    fn state_carries_identity_and_attributes() {
        let mut s = status();
        s.heating_percent = 35;
        s.gfci_status = Some("ok".to_owned());
        let state = Climate::new(&s).state(true);
        assert_eq!(state.unique_id, "schluter_heat_1001");
        assert_eq!(state.device_info.model, "DITRA-HEAT-E-RS1");
        assert_eq!(state.attributes.heating_percent, 35);
        assert_eq!(state.preset_modes.len(), 3);
        assert!(state.available);
    }

    #[test]
    fn preset_parse_rejects_unknown() {
        assert_eq!("away".parse::<PresetMode>(), Ok(PresetMode::Away));
        assert_eq!("boost".parse::<PresetMode>(), Err("boost".to_owned()));
    }
}
