use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::Notify,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    device_cache::DeviceCache,
    schluter::{models::ThermostatStatus, SchluterClient, SchluterError},
};

/// Why a polling cycle produced no data.
#[derive(Debug, thiserror::Error)]
pub enum UpdateFailed {
    #[error("Authentication failed. Please update your refresh token.")]
    ReauthRequired,
    #[error("Connection failed: {0}")]
    Reconnect(SchluterError),
    #[error("Error communicating with API: {0}")]
    Api(SchluterError),
}

/// Polls every thermostat of one location and publishes the results to a
/// [`DeviceCache`].
pub struct Coordinator {
    client: SchluterClient,
    location_id: i64,
    refresh_token: String,
    cache: DeviceCache,
    interval: Duration,
    wake: Arc<Notify>,
    /// Discovery result; filled on the first successful poll.
    known_devices: BTreeMap<i64, String>,
}

impl Coordinator {
    pub fn new(
        client: SchluterClient,
        location_id: i64,
        refresh_token: String,
        cache: DeviceCache,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            location_id,
            refresh_token,
            cache,
            interval,
            wake: Arc::new(Notify::new()),
            known_devices: BTreeMap::new(),
        }
    }

    /// Handle used to wake the loop for an immediate refresh.
    pub fn refresh_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Runs the polling loop indefinitely.
    /// Spawn this via `tokio::spawn`; the first poll is expected to have
    /// happened already through [`Coordinator::refresh`].
    pub async fn run(mut self) {
        info!(
            location_id = self.location_id,
            interval_secs = self.interval.as_secs(),
            "Polling loop started"
        );
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {
                    debug!(location_id = self.location_id, "Refresh requested");
                    ticker.reset();
                }
            }
            // Failures are already recorded in the cache and logged.
            let _ = self.refresh().await;
        }
    }

    /// Poll once, re-logging in a single time on authentication failure.
    pub async fn refresh(&mut self) -> Result<usize, UpdateFailed> {
        let result = match self.poll().await {
            Ok(devices) => Ok(devices),
            Err(err) if err.is_auth() => {
                warn!(location_id = self.location_id, error = %err, "Authentication error, attempting to re-login");
                match self.client.login(&self.refresh_token).await {
                    Ok(()) => self.poll().await.map_err(UpdateFailed::Reconnect),
                    Err(e) if e.is_auth() => {
                        error!(
                            location_id = self.location_id,
                            "Refresh token expired or invalid, reauthentication required"
                        );
                        self.cache.mark_reauth_required().await;
                        Err(UpdateFailed::ReauthRequired)
                    }
                    Err(e) => Err(UpdateFailed::Reconnect(e)),
                }
            }
            Err(err) => Err(UpdateFailed::Api(err)),
        };

        match result {
            Ok(devices) => {
                let count = devices.len();
                self.cache.replace(devices, Utc::now()).await;
                debug!(location_id = self.location_id, devices = count, "Poll complete");
                Ok(count)
            }
            Err(e) => {
                error!(location_id = self.location_id, error = %e, "Poll failed");
                self.cache.mark_failed(e.to_string()).await;
                Err(e)
            }
        }
    }

    /// One pass over every known device. Only authentication errors abort
    /// the pass; other per-device failures skip that device.
    async fn poll(&mut self) -> Result<Vec<ThermostatStatus>, SchluterError> {
        if self.known_devices.is_empty() {
            let devices = self.client.get_devices(self.location_id).await?;
            self.known_devices = devices
                .into_iter()
                .map(|d| (d.id, d.display_name()))
                .collect();
            info!(
                location_id = self.location_id,
                count = self.known_devices.len(),
                "Discovered devices"
            );
        }

        let mut statuses = Vec::with_capacity(self.known_devices.len());
        for (&device_id, name) in &self.known_devices {
            match self.client.get_thermostat_status(device_id).await {
                Ok(mut status) => {
                    status.name = name.clone();
                    statuses.push(status);
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    warn!(device_id, error = %e, "Failed to update device");
                }
            }
        }

        Ok(statuses)
    }
}
