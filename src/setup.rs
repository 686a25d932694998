//! Config flow: turns account credentials into a stored config entry.
//!
//! Credentials are used once, inside a single step, and are dropped when the
//! step returns. Only the refresh token obtained from them is kept.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time::Instant};
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    hub::{EntrySummary, Hub, HubError},
    schluter::{models::Location, SchluterClient, SchluterError},
    store::{ConfigEntry, StoreError},
};

/// Pending location choices are forgotten after this long.
const FLOW_TTL: Duration = Duration::from_secs(600);

#[derive(Clone, Deserialize, ToSchema)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("invalid email or password")]
    InvalidAuth,

    #[error("cannot connect to the Schluter cloud: {0}")]
    CannotConnect(String),

    #[error("no locations found for this account")]
    NoLocations,

    #[error("no devices found at location {0}")]
    NoDevices(i64),

    #[error("location {0} is already configured")]
    AlreadyConfigured(i64),

    #[error("unknown or expired flow {0}")]
    UnknownFlow(Uuid),

    #[error("location {0} is not one of the offered choices")]
    UnknownLocation(i64),

    #[error("unknown config entry {0}")]
    UnknownEntry(Uuid),

    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl FlowError {
    /// Stable code shown to the user.
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::InvalidAuth => "invalid_auth",
            FlowError::CannotConnect(_) => "cannot_connect",
            FlowError::NoLocations => "no_locations",
            FlowError::NoDevices(_) => "no_devices",
            FlowError::AlreadyConfigured(_) => "already_configured",
            FlowError::UnknownFlow(_) => "unknown_flow",
            FlowError::UnknownLocation(_) => "unknown_location",
            FlowError::UnknownEntry(_) => "unknown_entry",
            FlowError::Unknown(_) => "unknown",
        }
    }
}

impl From<SchluterError> for FlowError {
    fn from(e: SchluterError) -> Self {
        match e {
            SchluterError::Authentication(_) => FlowError::InvalidAuth,
            SchluterError::Connection(msg) | SchluterError::Api(msg) => FlowError::CannotConnect(msg),
        }
    }
}

impl From<StoreError> for FlowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyConfigured(id) => FlowError::AlreadyConfigured(id),
            StoreError::NotFound(id) => FlowError::UnknownEntry(id),
            other => FlowError::Unknown(other.to_string()),
        }
    }
}

impl From<HubError> for FlowError {
    fn from(e: HubError) -> Self {
        match e {
            HubError::NotFound(id) => FlowError::UnknownEntry(id),
            HubError::Store(e) => e.into(),
            other => FlowError::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LocationChoice {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    /// A config entry was stored and set up.
    CreateEntry { entry: EntrySummary },
    /// Several locations exist; continue with the location step.
    ShowLocation {
        flow_id: Uuid,
        locations: Vec<LocationChoice>,
    },
    /// The entry's refresh token was replaced and the entry reloaded.
    ReauthSuccessful { entry: EntrySummary },
}

/// State carried from the user step to the location step.
struct PendingFlow {
    client: SchluterClient,
    refresh_token: String,
    locations: Vec<Location>,
    created: Instant,
}

#[derive(Clone)]
pub struct ConfigFlow {
    hub: Hub,
    pending: Arc<Mutex<HashMap<Uuid, PendingFlow>>>,
}

impl ConfigFlow {
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate credentials, then either create the entry for the only
    /// location or ask which location to add.
    pub async fn step_user(&self, credentials: Credentials) -> Result<FlowResult, FlowError> {
        let (client, refresh_token) = self.authenticate(&credentials).await?;
        drop(credentials);

        let locations = client.get_locations().await.map_err(log_flow_error)?;
        if locations.is_empty() {
            return Err(FlowError::NoLocations);
        }

        if let [location] = locations.as_slice() {
            let result = self.create_entry(&client, refresh_token, location).await;
            client.logout().await;
            return result;
        }

        let choices = locations
            .iter()
            .map(|l| LocationChoice {
                id: l.id,
                name: l.display_name(),
            })
            .collect();
        let flow_id = Uuid::new_v4();

        let mut pending = self.pending.lock().await;
        pending.retain(|_, f| f.created.elapsed() < FLOW_TTL);
        pending.insert(
            flow_id,
            PendingFlow {
                client,
                refresh_token,
                locations,
                created: Instant::now(),
            },
        );
        info!(%flow_id, "Multiple locations found, awaiting selection");

        Ok(FlowResult::ShowLocation {
            flow_id,
            locations: choices,
        })
    }

    pub async fn step_location(&self, flow_id: Uuid, location_id: i64) -> Result<FlowResult, FlowError> {
        let (client, refresh_token, location) = {
            let mut pending = self.pending.lock().await;
            pending.retain(|_, f| f.created.elapsed() < FLOW_TTL);
            let location = pending
                .get(&flow_id)
                .ok_or(FlowError::UnknownFlow(flow_id))?
                .locations
                .iter()
                .find(|l| l.id == location_id)
                .cloned()
                .ok_or(FlowError::UnknownLocation(location_id))?;
            let flow = pending.remove(&flow_id).ok_or(FlowError::UnknownFlow(flow_id))?;
            (flow.client, flow.refresh_token, location)
        };

        let result = self.create_entry(&client, refresh_token, &location).await;
        client.logout().await;
        result
    }

    /// Exchange fresh credentials for a new refresh token for an existing
    /// entry. Only the token changes; the location stays as configured.
    pub async fn step_reauth(&self, entry_id: Uuid, credentials: Credentials) -> Result<FlowResult, FlowError> {
        let entry = self
            .hub
            .store()
            .get(entry_id)
            .await
            .ok_or(FlowError::UnknownEntry(entry_id))?;

        let (client, refresh_token) = self.authenticate(&credentials).await?;
        drop(credentials);

        let devices = client
            .get_devices(entry.location_id)
            .await
            .map_err(log_flow_error)?;
        client.logout().await;
        if devices.is_empty() {
            return Err(FlowError::NoDevices(entry.location_id));
        }

        match self.hub.update_refresh_token(entry_id, refresh_token).await {
            Ok(()) => {}
            Err(e @ HubError::SetupFailed { .. }) => {
                warn!(%entry_id, error = %e, "Refresh token stored but reload failed");
            }
            Err(e) => return Err(e.into()),
        }
        info!(%entry_id, "Reauthentication successful");

        Ok(FlowResult::ReauthSuccessful {
            entry: self.hub.summary(entry_id).await?,
        })
    }

    /// Credential login followed by connect. The returned client holds a
    /// live session.
    async fn authenticate(&self, credentials: &Credentials) -> Result<(SchluterClient, String), FlowError> {
        let client = self.hub.new_client().map_err(log_flow_error)?;
        let login = client
            .login_with_credentials(&credentials.email, &credentials.password)
            .await
            .map_err(log_flow_error)?;
        client.connect().await.map_err(log_flow_error)?;
        Ok((client, login.refresh_token))
    }

    async fn create_entry(
        &self,
        client: &SchluterClient,
        refresh_token: String,
        location: &Location,
    ) -> Result<FlowResult, FlowError> {
        let devices = client.get_devices(location.id).await.map_err(log_flow_error)?;
        if devices.is_empty() {
            return Err(FlowError::NoDevices(location.id));
        }
        info!(location_id = location.id, devices = devices.len(), "Location validated");

        if self.hub.store().is_configured(location.id).await {
            return Err(FlowError::AlreadyConfigured(location.id));
        }

        let entry = ConfigEntry::new(location.id, &location.display_name(), refresh_token);
        let summary = self.hub.add_entry(entry).await?;
        Ok(FlowResult::CreateEntry { entry: summary })
    }
}

fn log_flow_error(e: SchluterError) -> FlowError {
    error!(error = %e, "Config flow request failed");
    e.into()
}
