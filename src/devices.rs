//! Tracked devices: where observations come from and where resolved positions
//! go.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use thiserror::Error;

use crate::model::{Attributes, LocationRecord};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("could not find entity object for {0}")]
    Missing(String),
    #[error("{0} does not support geocoded location updates")]
    Unsupported(String),
}

/// Receives resolved positions for one device.
pub trait LocationSink: Send + Sync {
    fn set_geocoded_location(&self, location: LocationRecord);
}

/// Read access to device attributes plus sink resolution.
pub trait DeviceDirectory: Send + Sync {
    /// Current attributes of a device, `None` if the device is unknown.
    fn attributes(&self, device_id: &str) -> Option<Attributes>;

    fn sink(&self, device_id: &str) -> Result<Arc<dyn LocationSink>, SinkError>;
}

/// Last position delivered to a device.
#[derive(Debug, Default)]
pub struct TrackedPosition {
    location: Mutex<Option<LocationRecord>>,
}

impl TrackedPosition {
    pub fn get(&self) -> Option<LocationRecord> {
        *self.location.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocationSink for TrackedPosition {
    fn set_geocoded_location(&self, location: LocationRecord) {
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = Some(location);
    }
}

struct Device {
    attributes: Attributes,
    position: Arc<TrackedPosition>,
}

/// In-memory device registry fed by state updates.
///
/// Only ids under the tracker prefix accept positions; other entities can be
/// stored but resolving their sink fails with [`SinkError::Unsupported`].
pub struct Registry {
    tracker_prefix: String,
    devices: RwLock<HashMap<String, Device>>,
}

impl Registry {
    pub fn new(tracker_prefix: impl Into<String>) -> Self {
        Self {
            tracker_prefix: tracker_prefix.into(),
            devices: RwLock::new(HashMap::new()),
        }
    }

    pub fn tracker_prefix(&self) -> &str {
        &self.tracker_prefix
    }

    /// Replaces a device's attributes, returning the previous ones.
    pub fn update(&self, device_id: &str, attributes: Attributes) -> Option<Attributes> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        match devices.get_mut(device_id) {
            Some(device) => Some(std::mem::replace(&mut device.attributes, attributes)),
            None => {
                devices.insert(
                    device_id.to_string(),
                    Device {
                        attributes,
                        position: Arc::default(),
                    },
                );
                None
            }
        }
    }

    pub fn position(&self, device_id: &str) -> Option<LocationRecord> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices.get(device_id).and_then(|x| x.position.get())
    }
}

impl DeviceDirectory for Registry {
    fn attributes(&self, device_id: &str) -> Option<Attributes> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices.get(device_id).map(|x| x.attributes.clone())
    }

    fn sink(&self, device_id: &str) -> Result<Arc<dyn LocationSink>, SinkError> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        let device = devices
            .get(device_id)
            .ok_or_else(|| SinkError::Missing(device_id.to_string()))?;
        if !device_id.starts_with(&self.tracker_prefix) {
            return Err(SinkError::Unsupported(device_id.to_string()));
        }
        Ok(device.position.clone())
    }
}
