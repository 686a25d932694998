use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Local, Utc};
use tokio::sync::RwLock;

use crate::{entities::sensor::HeatingTime, schluter::models::ThermostatStatus};

/// Latest polled state of one config entry's devices.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared between the
/// polling task, the command dispatcher and HTTP handlers.
#[derive(Clone, Default)]
pub struct DeviceCache {
    inner: Arc<RwLock<Snapshot>>,
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub devices: BTreeMap<i64, ThermostatStatus>,
    pub heating_time: HashMap<i64, HeatingTime>,
    pub last_update: Option<DateTime<Utc>>,
    pub last_update_success: bool,
    pub last_error: Option<String>,
    pub reauth_required: bool,
}

impl Snapshot {
    /// A device is available when it answered in the last successful poll.
    pub fn is_available(&self, device_id: i64) -> bool {
        self.last_update_success && self.devices.contains_key(&device_id)
    }
}

impl DeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the device set with the result of a successful poll and feed
    /// the heating-time trackers. Devices missing from the poll have their
    /// tracker interrupted.
    pub async fn replace(&self, devices: Vec<ThermostatStatus>, at: DateTime<Utc>) {
        let local = at.with_timezone(&Local);
        let mut guard = self.inner.write().await;

        for status in &devices {
            guard
                .heating_time
                .entry(status.device_id)
                .or_default()
                .record(status.heating, local);
        }
        for (device_id, tracker) in guard.heating_time.iter_mut() {
            if !devices.iter().any(|s| s.device_id == *device_id) {
                tracker.interrupt();
            }
        }

        guard.devices = devices.into_iter().map(|s| (s.device_id, s)).collect();
        guard.last_update = Some(at);
        guard.last_update_success = true;
        guard.last_error = None;
        guard.reauth_required = false;
    }

    /// Keep the previous devices but flag the entry as stale.
    pub async fn mark_failed(&self, error: impl Into<String>) {
        let mut guard = self.inner.write().await;
        guard.last_update_success = false;
        guard.last_error = Some(error.into());
        guard.heating_time.values_mut().for_each(HeatingTime::interrupt);
    }

    pub async fn mark_reauth_required(&self) {
        self.inner.write().await.reauth_required = true;
    }

    pub async fn device(&self, device_id: i64) -> Option<ThermostatStatus> {
        self.inner.read().await.devices.get(&device_id).cloned()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::schluter::models::DeviceAttributes;

    fn status(device_id: i64, heating: bool) -> ThermostatStatus {
        let mut s = ThermostatStatus::from_attributes(device_id, "dev", DeviceAttributes::default());
        s.heating = heating;
        s
    }

    #[tokio::test]
    async fn empty_cache_has_nothing_available() {
        let cache = DeviceCache::new();
        let snap = cache.snapshot().await;
        assert!(snap.devices.is_empty());
        assert!(!snap.is_available(1));
        assert!(cache.device(1).await.is_none());
    }

    #[tokio::test]
    async fn replace_drops_devices_missing_from_poll() {
        let cache = DeviceCache::new();
        cache.replace(vec![status(1, false), status(2, false)], Utc::now()).await;
        cache.replace(vec![status(2, true)], Utc::now()).await;

        let snap = cache.snapshot().await;
        assert!(!snap.is_available(1));
        assert!(snap.is_available(2));
        assert!(snap.devices[&2].heating);
    }

    #[tokio::test]
    async fn failure_keeps_devices_but_makes_them_unavailable() {
        let cache = DeviceCache::new();
        cache.replace(vec![status(1, false)], Utc::now()).await;
        cache.mark_failed("Error communicating with API: boom").await;

        let snap = cache.snapshot().await;
        assert!(snap.devices.contains_key(&1));
        assert!(!snap.is_available(1));
        assert_eq!(snap.last_error.as_deref(), Some("Error communicating with API: boom"));
    }

    #[tokio::test]
    async fn successful_poll_clears_reauth_flag() {
        let cache = DeviceCache::new();
        cache.mark_reauth_required().await;
        assert!(cache.snapshot().await.reauth_required);

        cache.replace(vec![status(1, false)], Utc::now()).await;
        assert!(!cache.snapshot().await.reauth_required);
    }

    #[tokio::test]
    async fn replace_feeds_heating_time() {
        let cache = DeviceCache::new();
        cache.replace(vec![status(1, true)], Utc::now()).await;

        let snap = cache.snapshot().await;
        assert!(snap.heating_time[&1].is_heating());
    }

    fn utc(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn failed_poll_breaks_heating_interval() {
        let cache = DeviceCache::new();
        cache.replace(vec![status(1, true)], utc(12)).await;
        cache.mark_failed("Error communicating with API: timeout").await;
        cache.replace(vec![status(1, true)], utc(17)).await;

        let snap = cache.snapshot().await;
        assert_eq!(snap.heating_time[&1].hours(), 0.0);
        assert!(snap.heating_time[&1].is_heating());
    }

    #[tokio::test]
    async fn skipped_device_breaks_heating_interval() {
        let cache = DeviceCache::new();
        cache.replace(vec![status(1, true), status(2, true)], utc(12)).await;
        cache.replace(vec![status(2, true)], utc(14)).await;
        cache.replace(vec![status(1, true), status(2, true)], utc(16)).await;

        let snap = cache.snapshot().await;
        assert_eq!(snap.heating_time[&1].hours(), 0.0);
        assert!(snap.heating_time[&2].hours() > 0.0);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let cache = DeviceCache::new();
        let clone = cache.clone();
        cache.replace(vec![status(5, false)], Utc::now()).await;
        assert!(clone.device(5).await.is_some());
    }
}
