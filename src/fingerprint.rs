//! Canonical cache keys for sets of observed access points.
//!
//! A fingerprint is the set of BSSIDs a device can currently hear. Signal
//! strength and listing order are ignored: two scans that see the same access
//! points are treated as the same physical location.

use std::{collections::BTreeSet, fmt};

use crate::model::AccessPoint;

/// Joins BSSIDs inside a [`FingerprintKey`]. Never part of a valid BSSID.
pub const SEPARATOR: char = '|';

/// Case-insensitive access point identifier, stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bssid(String);

impl Bssid {
    /// Returns `None` for blank input or input containing [`SEPARATOR`].
    pub fn new(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.contains(SEPARATOR) {
            return None;
        }
        Some(Self(raw.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Bssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint(BTreeSet<Bssid>);

impl Fingerprint {
    /// Builds a fingerprint from a scan, dropping access points without a
    /// usable MAC address.
    pub fn from_access_points(aps: &[AccessPoint]) -> Self {
        let mut bssids = BTreeSet::new();
        for ap in aps {
            match ap.mac_address.as_deref().and_then(Bssid::new) {
                Some(bssid) => {
                    bssids.insert(bssid);
                }
                None => tracing::debug!(mac_address = ?ap.mac_address, "ignoring access point"),
            }
        }
        Self(bssids)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bssid> {
        self.0.iter()
    }

    pub fn key(&self) -> FingerprintKey {
        encode(self)
    }
}

impl FromIterator<Bssid> for Fingerprint {
    fn from_iter<T: IntoIterator<Item = Bssid>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Sorted, `|`-joined BSSIDs of a [`Fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FingerprintKey(String);

impl FingerprintKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for FingerprintKey {
    /// Re-canonicalises the key so that keys read back from storage or CSV
    /// compare equal to freshly encoded ones.
    fn from(value: String) -> Self {
        encode(&decode_str(&value))
    }
}

impl fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn encode(fingerprint: &Fingerprint) -> FingerprintKey {
    let mut key = String::new();
    for (i, bssid) in fingerprint.0.iter().enumerate() {
        if i > 0 {
            key.push(SEPARATOR);
        }
        key.push_str(bssid.as_str());
    }
    FingerprintKey(key)
}

pub fn decode(key: &FingerprintKey) -> Fingerprint {
    decode_str(&key.0)
}

fn decode_str(key: &str) -> Fingerprint {
    key.split(SEPARATOR).filter_map(Bssid::new).collect()
}
