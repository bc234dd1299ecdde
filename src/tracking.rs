use std::collections::HashMap;

use crate::fingerprint::Fingerprint;

/// Last fingerprint processed per device. Lives in memory only.
#[derive(Debug, Default)]
pub struct DeviceTracker {
    last: HashMap<String, Fingerprint>,
}

impl DeviceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `fingerprint` matches the last one recorded for this device.
    /// A device that has never been seen is never unchanged.
    pub fn is_unchanged(&self, device_id: &str, fingerprint: &Fingerprint) -> bool {
        self.last.get(device_id) == Some(fingerprint)
    }

    pub fn record(&mut self, device_id: &str, fingerprint: Fingerprint) {
        self.last.insert(device_id.to_string(), fingerprint);
    }

    pub fn last(&self, device_id: &str) -> Option<&Fingerprint> {
        self.last.get(device_id)
    }
}
