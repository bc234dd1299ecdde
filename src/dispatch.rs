//! Decides, per observation, whether a provider lookup is needed and routes
//! the result to the cache and the device.
//!
//! Two independent checks guard the provider:
//!
//! - the cache, keyed by fingerprint and shared by every device;
//! - the device tracker, which remembers the last fingerprint each device
//!   reported even when its lookup failed and nothing was cached.
//!
//! A forced dispatch skips both. Failed lookups never reach the cache.
//!
//! Each fingerprint has its own lock, held from the cache check to the cache
//! write, so concurrent dispatches of the same fingerprint cost one provider
//! call. The cache and tracker themselves are only locked between awaits, and
//! a slow lookup never holds up other fingerprints.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use geo::{Distance, Haversine};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

use crate::{
    cache::LocationCache,
    devices::{DeviceDirectory, SinkError},
    fingerprint::{Fingerprint, FingerprintKey},
    geolocate::{Geolocator, ProviderError},
    model::{AccessPoint, LocationRecord},
    tracking::DeviceTracker,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("entity {0} not found")]
    UnknownDevice(String),
    #[error("no 'wifi_access_points' attribute found for {0}")]
    MissingAccessPoints(String),
    #[error("no usable access point MAC addresses reported by {0}")]
    EmptyFingerprint(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl DispatchError {
    /// Errors caused by the request itself rather than a collaborator.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::UnknownDevice(_) | Self::MissingAccessPoints(_) | Self::EmptyFingerprint(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// Served from the location cache.
    Cached(LocationRecord),
    /// Looked up from the provider.
    Fetched(LocationRecord),
    /// Same access points as the device's previous observation; nothing done.
    Unchanged,
}

impl Resolution {
    pub fn location(&self) -> Option<LocationRecord> {
        match self {
            Resolution::Cached(x) | Resolution::Fetched(x) => Some(*x),
            Resolution::Unchanged => None,
        }
    }
}

pub struct State {
    pub cache: LocationCache,
    pub tracker: DeviceTracker,
}

type KeyLocks = StdMutex<HashMap<FingerprintKey, Arc<Mutex<()>>>>;

/// Exclusive hold on one fingerprint. The lock entry is removed once nobody
/// else is waiting on it.
struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: FingerprintKey,
    guard: OwnedMutexGuard<()>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // map + this guard
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) == 2 {
            locks.remove(&self.key);
        }
    }
}

pub struct Dispatcher {
    state: Mutex<State>,
    key_locks: KeyLocks,
    devices: Arc<dyn DeviceDirectory>,
    geolocator: Arc<dyn Geolocator>,
}

impl Dispatcher {
    pub fn new(
        cache: LocationCache,
        tracker: DeviceTracker,
        devices: Arc<dyn DeviceDirectory>,
        geolocator: Arc<dyn Geolocator>,
    ) -> Self {
        Self {
            state: Mutex::new(State { cache, tracker }),
            key_locks: StdMutex::new(HashMap::new()),
            devices,
            geolocator,
        }
    }

    /// Exclusive access to the cache and tracker, e.g. for export.
    pub async fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().await
    }

    /// Resolves the current Wi-Fi scan of `device_id` and delivers the
    /// position to the device.
    pub async fn geolocate(&self, device_id: &str, force: bool) -> Result<Resolution, DispatchError> {
        let attributes = self
            .devices
            .attributes(device_id)
            .ok_or_else(|| DispatchError::UnknownDevice(device_id.to_string()))?;
        let access_points = attributes
            .wifi_access_points
            .filter(|x| !x.is_empty())
            .ok_or_else(|| DispatchError::MissingAccessPoints(device_id.to_string()))?;

        let resolution = self.resolve(device_id, &access_points, force).await?;
        if let Some(location) = resolution.location() {
            self.devices
                .sink(device_id)?
                .set_geocoded_location(location);
            tracing::info!(device_id, "updated with geocoded location");
        }
        Ok(resolution)
    }

    /// Cache / de-bounce / provider decision for one scan, without touching
    /// the device sink.
    pub async fn resolve(
        &self,
        device_id: &str,
        access_points: &[AccessPoint],
        force: bool,
    ) -> Result<Resolution, DispatchError> {
        let fingerprint = Fingerprint::from_access_points(access_points);
        if fingerprint.is_empty() {
            return Err(DispatchError::EmptyFingerprint(device_id.to_string()));
        }
        let key = fingerprint.key();
        let _key_guard = self.lock_key(&key).await;

        if !force {
            let mut state = self.state.lock().await;
            if let Some(cached) = state.cache.lookup(&key).copied() {
                tracing::info!(
                    device_id,
                    bssids = fingerprint.len(),
                    latitude = cached.latitude,
                    longitude = cached.longitude,
                    accuracy = cached.accuracy,
                    "using cached location"
                );
                state.tracker.record(device_id, fingerprint);
                return Ok(Resolution::Cached(cached));
            }

            if state.tracker.is_unchanged(device_id, &fingerprint) {
                tracing::info!(
                    device_id,
                    bssids = fingerprint.len(),
                    "skipping geolocation, access points unchanged; use force to override"
                );
                return Ok(Resolution::Unchanged);
            }
        }

        tracing::info!(
            device_id,
            access_points = access_points.len(),
            force,
            "calling geolocation provider"
        );
        let result = self.geolocator.geolocate(access_points).await;

        let mut state = self.state.lock().await;
        let location = match result {
            Ok(x) => x,
            Err(e) => {
                // remembered so an identical scan is not retried until it
                // changes or the caller forces it
                state.tracker.record(device_id, fingerprint);
                return Err(e.into());
            }
        };
        tracing::info!(
            device_id,
            latitude = location.latitude,
            longitude = location.longitude,
            accuracy = location.accuracy,
            bssids = fingerprint.len(),
            "geolocation succeeded"
        );

        if let Some(previous) = state.cache.lookup(&key) {
            let moved = Haversine::distance(previous.point(), location.point());
            if moved > previous.accuracy.max(location.accuracy) {
                tracing::warn!(
                    device_id,
                    %key,
                    meters = moved,
                    "refreshed location moved outside previous accuracy"
                );
            }
        }

        // a failed flush leaves the entry in memory; the position is still good
        if let Err(e) = state.cache.put(key.clone(), location) {
            tracing::error!(error = ?e, %key, "failed to persist location cache");
        } else {
            tracing::debug!(%key, "saved location to cache");
        }
        state.tracker.record(device_id, fingerprint);

        Ok(Resolution::Fetched(location))
    }

    async fn lock_key(&self, key: &FingerprintKey) -> KeyGuard<'_> {
        let lock = self
            .key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        KeyGuard {
            locks: &self.key_locks,
            key: key.clone(),
            guard: lock.lock_owned().await,
        }
    }
}
