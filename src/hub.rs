use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    commands::CommandDispatcher,
    config::Config,
    coordinator::Coordinator,
    device_cache::DeviceCache,
    entities::{
        climate::{Climate, ClimateState},
        sensor::{sensors_for, SensorContext, SensorState},
    },
    schluter::{SchluterClient, SchluterResult},
    store::{ConfigEntry, EntryStore, StoreError},
};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("unknown config entry {0}")]
    NotFound(Uuid),

    #[error("config entry {0} is not loaded")]
    NotLoaded(Uuid),

    #[error("setup of config entry {entry_id} failed: {reason}")]
    SetupFailed { entry_id: Uuid, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Loaded,
    SetupError,
    ReauthRequired,
    NotLoaded,
}

/// Public view of a config entry. Never carries the refresh token.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EntrySummary {
    pub entry_id: Uuid,
    pub location_id: i64,
    pub title: String,
    pub state: EntryState,
    pub device_count: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub last_update_success: bool,
    pub last_error: Option<String>,
}

/// Everything a loaded entry owns while it runs.
struct EntryRuntime {
    client: SchluterClient,
    cache: DeviceCache,
    commands: CommandDispatcher,
    task: JoinHandle<()>,
}

/// Owns the running config entries: one client, poller and dispatcher per
/// configured location.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: Config,
    store: EntryStore,
    runtimes: RwLock<HashMap<Uuid, EntryRuntime>>,
    setup_errors: RwLock<HashMap<Uuid, String>>,
}

impl Hub {
    pub fn new(config: Config, store: EntryStore) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                store,
                runtimes: RwLock::new(HashMap::new()),
                setup_errors: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Set up every stored entry. A failing entry is recorded and skipped.
    pub async fn start(&self) {
        for entry in self.inner.store.all().await {
            let _ = self.setup_entry(entry).await;
        }
    }

    pub fn store(&self) -> &EntryStore {
        &self.inner.store
    }

    pub fn new_client(&self) -> SchluterResult<SchluterClient> {
        SchluterClient::from_config(&self.inner.config)
    }

    /// Log in with the entry's refresh token, run the first poll and start
    /// the polling loop.
    pub async fn setup_entry(&self, entry: ConfigEntry) -> Result<(), HubError> {
        let entry_id = entry.entry_id;
        match self.try_setup(&entry).await {
            Ok(runtime) => {
                self.inner.setup_errors.write().await.remove(&entry_id);
                let mut runtimes = self.inner.runtimes.write().await;
                // The entry may have been removed while setup was in flight.
                if self.inner.store.get(entry_id).await.is_none() {
                    drop(runtimes);
                    runtime.task.abort();
                    runtime.client.logout().await;
                    warn!(%entry_id, "Config entry removed during setup, discarding runtime");
                    return Err(HubError::NotFound(entry_id));
                }
                if let Some(old) = runtimes.insert(entry_id, runtime) {
                    old.task.abort();
                }
                info!(%entry_id, location_id = entry.location_id, "Config entry loaded");
                Ok(())
            }
            Err(reason) if self.inner.store.get(entry_id).await.is_none() => {
                warn!(%entry_id, reason = %reason, "Config entry removed during setup");
                Err(HubError::NotFound(entry_id))
            }
            Err(reason) => {
                error!(%entry_id, location_id = entry.location_id, reason = %reason, "Config entry setup failed");
                self.inner
                    .setup_errors
                    .write()
                    .await
                    .insert(entry_id, reason.clone());
                Err(HubError::SetupFailed { entry_id, reason })
            }
        }
    }

    async fn try_setup(&self, entry: &ConfigEntry) -> Result<EntryRuntime, String> {
        let client = self.new_client().map_err(|e| e.to_string())?;
        client
            .login(&entry.refresh_token)
            .await
            .map_err(|e| format!("failed to authenticate with Schluter API: {e}"))?;

        let cache = DeviceCache::new();
        let mut coordinator = Coordinator::new(
            client.clone(),
            entry.location_id,
            entry.refresh_token.clone(),
            cache.clone(),
            self.inner.config.poll_interval(),
        );
        coordinator.refresh().await.map_err(|e| e.to_string())?;

        let commands = CommandDispatcher::new(client.clone(), cache.clone(), coordinator.refresh_handle());
        let task = tokio::spawn(coordinator.run());

        Ok(EntryRuntime {
            client,
            cache,
            commands,
            task,
        })
    }

    /// Stop polling and drop the session. Returns whether the entry was
    /// loaded.
    pub async fn unload_entry(&self, entry_id: Uuid) -> bool {
        self.inner.setup_errors.write().await.remove(&entry_id);
        let Some(runtime) = self.inner.runtimes.write().await.remove(&entry_id) else {
            return false;
        };
        runtime.task.abort();
        runtime.client.logout().await;
        info!(%entry_id, "Config entry unloaded");
        true
    }

    pub async fn reload_entry(&self, entry_id: Uuid) -> Result<(), HubError> {
        let entry = self
            .inner
            .store
            .get(entry_id)
            .await
            .ok_or(HubError::NotFound(entry_id))?;
        self.unload_entry(entry_id).await;
        self.setup_entry(entry).await
    }

    /// Persist a new entry and set it up. A setup failure leaves the entry
    /// stored in the `setup_error` state so it can be reloaded later.
    pub async fn add_entry(&self, entry: ConfigEntry) -> Result<EntrySummary, HubError> {
        let entry_id = entry.entry_id;
        self.inner.store.insert(entry.clone()).await?;
        info!(%entry_id, location_id = entry.location_id, title = %entry.title, "Config entry created");

        if let Err(e) = self.setup_entry(entry).await {
            warn!(%entry_id, error = %e, "New config entry stored but not loaded");
        }
        self.summary(entry_id).await
    }

    /// Forget the entry first, then unload it. A setup still in flight sees
    /// the entry gone and discards its runtime.
    pub async fn remove_entry(&self, entry_id: Uuid) -> Result<(), HubError> {
        self.inner.store.remove(entry_id).await.map_err(|e| match e {
            StoreError::NotFound(id) => HubError::NotFound(id),
            other => HubError::Store(other),
        })?;
        self.unload_entry(entry_id).await;
        info!(%entry_id, "Config entry removed");
        Ok(())
    }

    /// Store a new refresh token and reload the entry with it.
    pub async fn update_refresh_token(&self, entry_id: Uuid, refresh_token: String) -> Result<(), HubError> {
        self.inner
            .store
            .update_refresh_token(entry_id, refresh_token)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(id) => HubError::NotFound(id),
                other => HubError::Store(other),
            })?;
        self.reload_entry(entry_id).await
    }

    pub async fn entries(&self) -> Vec<EntrySummary> {
        let mut out = Vec::new();
        for entry in self.inner.store.all().await {
            out.push(self.summarize(&entry).await);
        }
        out
    }

    pub async fn summary(&self, entry_id: Uuid) -> Result<EntrySummary, HubError> {
        let entry = self
            .inner
            .store
            .get(entry_id)
            .await
            .ok_or(HubError::NotFound(entry_id))?;
        Ok(self.summarize(&entry).await)
    }

    async fn summarize(&self, entry: &ConfigEntry) -> EntrySummary {
        let mut summary = EntrySummary {
            entry_id: entry.entry_id,
            location_id: entry.location_id,
            title: entry.title.clone(),
            state: EntryState::NotLoaded,
            device_count: 0,
            last_update: None,
            last_update_success: false,
            last_error: None,
        };

        if let Some(reason) = self.inner.setup_errors.read().await.get(&entry.entry_id) {
            summary.state = EntryState::SetupError;
            summary.last_error = Some(reason.clone());
            return summary;
        }

        let cache = match self.inner.runtimes.read().await.get(&entry.entry_id) {
            Some(runtime) => runtime.cache.clone(),
            None => return summary,
        };
        let snap = cache.snapshot().await;
        summary.state = if snap.reauth_required {
            EntryState::ReauthRequired
        } else {
            EntryState::Loaded
        };
        summary.device_count = snap.devices.len();
        summary.last_update = snap.last_update;
        summary.last_update_success = snap.last_update_success;
        summary.last_error = snap.last_error;
        summary
    }

    pub async fn commands(&self, entry_id: Uuid) -> Result<CommandDispatcher, HubError> {
        Ok(self.runtime_cache_and_commands(entry_id).await?.1)
    }

    pub async fn climates(&self, entry_id: Uuid) -> Result<Vec<ClimateState>, HubError> {
        let (cache, _) = self.runtime_cache_and_commands(entry_id).await?;
        let snap = cache.snapshot().await;
        Ok(snap
            .devices
            .values()
            .map(|status| Climate::new(status).state(snap.is_available(status.device_id)))
            .collect())
    }

    pub async fn sensors(&self, entry_id: Uuid) -> Result<Vec<SensorState>, HubError> {
        let (cache, _) = self.runtime_cache_and_commands(entry_id).await?;
        let snap = cache.snapshot().await;
        Ok(snap
            .devices
            .values()
            .flat_map(|status| {
                sensors_for(SensorContext {
                    status,
                    heating_time: snap.heating_time.get(&status.device_id),
                    floor: self.inner.config.floor(status.device_id),
                    last_update: snap.last_update,
                    available: snap.is_available(status.device_id),
                })
            })
            .collect())
    }

    async fn runtime_cache_and_commands(
        &self,
        entry_id: Uuid,
    ) -> Result<(DeviceCache, CommandDispatcher), HubError> {
        if let Some(runtime) = self.inner.runtimes.read().await.get(&entry_id) {
            return Ok((runtime.cache.clone(), runtime.commands.clone()));
        }
        if self.inner.store.get(entry_id).await.is_some() {
            Err(HubError::NotLoaded(entry_id))
        } else {
            Err(HubError::NotFound(entry_id))
        }
    }

    /// Unload every entry; used on process shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.inner.runtimes.read().await.keys().copied().collect();
        for entry_id in ids {
            self.unload_entry(entry_id).await;
        }
        info!("All config entries unloaded");
    }
}
