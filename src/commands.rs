use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

use crate::{
    device_cache::DeviceCache,
    entities::climate::{Climate, HvacMode, PresetMode, COMFORT_TEMP, TEMP_STEP},
    schluter::{
        models::{OccupancyMode, SetpointMode, DEFAULT_MIN_TEMP},
        SchluterClient, SchluterError,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown device {0}")]
    UnknownDevice(i64),

    #[error("temperature {requested} is outside the allowed range {min}..={max}")]
    OutOfRange { requested: f64, min: f64, max: f64 },

    #[error("unknown preset mode '{0}'")]
    UnknownPreset(String),

    #[error(transparent)]
    Api(#[from] SchluterError),
}

/// Translates climate service calls into vendor API writes for one entry.
#[derive(Clone)]
pub struct CommandDispatcher {
    client: SchluterClient,
    cache: DeviceCache,
    refresh: Arc<Notify>,
}

impl CommandDispatcher {
    pub fn new(client: SchluterClient, cache: DeviceCache, refresh: Arc<Notify>) -> Self {
        Self {
            client,
            cache,
            refresh,
        }
    }

    /// Returns the setpoint actually sent, snapped to the 0.5 °C step.
    pub async fn set_temperature(&self, device_id: i64, temperature: f64) -> Result<f64, CommandError> {
        let status = self
            .cache
            .device(device_id)
            .await
            .ok_or(CommandError::UnknownDevice(device_id))?;
        let climate = Climate::new(&status);
        let (min, max) = (climate.min_temp(), climate.max_temp());

        if !temperature.is_finite() || temperature < min || temperature > max {
            return Err(CommandError::OutOfRange {
                requested: temperature,
                min,
                max,
            });
        }

        let snapped = snap(temperature).clamp(min, max);
        self.client.set_temperature(device_id, snapped).await?;
        self.refresh.notify_one();
        Ok(snapped)
    }

    pub async fn set_preset_mode(&self, device_id: i64, preset: &str) -> Result<PresetMode, CommandError> {
        self.ensure_known(device_id).await?;
        let preset: PresetMode = preset.parse().map_err(CommandError::UnknownPreset)?;

        match preset {
            PresetMode::Schedule => {
                self.client.set_mode(device_id, SetpointMode::Schedule).await?;
            }
            PresetMode::Away | PresetMode::Home => {
                let occupancy = if preset == PresetMode::Away {
                    OccupancyMode::Away
                } else {
                    OccupancyMode::Home
                };
                self.client.set_mode(device_id, SetpointMode::Manual).await?;
                self.client.set_occupancy_mode(device_id, occupancy).await?;
            }
        }

        info!(device_id, preset = %preset, "Preset mode applied");
        self.refresh.notify_one();
        Ok(preset)
    }

    /// Heat raises a minimum setpoint to a comfortable 20 °C; off drops to
    /// the minimum.
    pub async fn set_hvac_mode(&self, device_id: i64, mode: HvacMode) -> Result<(), CommandError> {
        let status = self
            .cache
            .device(device_id)
            .await
            .ok_or(CommandError::UnknownDevice(device_id))?;

        match mode {
            HvacMode::Heat => match status.target_temp {
                Some(t) if t > DEFAULT_MIN_TEMP => {
                    info!(device_id, target = t, "Already heating");
                }
                _ => {
                    self.client.set_temperature(device_id, COMFORT_TEMP).await?;
                }
            },
            HvacMode::Off => {
                self.client.set_temperature(device_id, DEFAULT_MIN_TEMP).await?;
            }
        }

        self.refresh.notify_one();
        Ok(())
    }

    async fn ensure_known(&self, device_id: i64) -> Result<(), CommandError> {
        match self.cache.device(device_id).await {
            Some(_) => Ok(()),
            None => Err(CommandError::UnknownDevice(device_id)),
        }
    }
}

fn snap(temperature: f64) -> f64 {
    (temperature / TEMP_STEP).round() * TEMP_STEP
}
