//! Fingerprint → location cache, persisted in full after every write.
//!
//! Entries are never evicted. The number of distinct Wi-Fi neighbourhoods a
//! set of devices moves through is small, and reusing them is the point.
//! Rewriting the whole document on each `put` is fine at that scale but is
//! the first thing to revisit if caches grow into the tens of thousands.

use std::{
    collections::{hash_map, BTreeMap, HashMap},
    io,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{fingerprint::FingerprintKey, model::LocationRecord, storage::Store};

pub const STORAGE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read location cache")]
    Load(#[source] io::Error),
    #[error("failed to persist location cache")]
    Persist(#[source] io::Error),
    #[error("failed to encode location cache")]
    Encode(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    location_cache: HashMap<String, Value>,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u32,
    location_cache: BTreeMap<&'a str, &'a LocationRecord>,
}

pub struct LocationCache {
    entries: HashMap<FingerprintKey, LocationRecord>,
    store: Arc<dyn Store>,
}

impl LocationCache {
    /// Reads the persisted document. Nothing stored yet, an unknown schema
    /// version, or an undecodable document all start an empty cache. Single
    /// unreadable entries are dropped and the rest are kept.
    pub fn load(store: Arc<dyn Store>) -> Result<Self, CacheError> {
        let entries = match store.load().map_err(CacheError::Load)? {
            Some(data) => decode(&data),
            None => HashMap::new(),
        };
        Ok(Self { entries, store })
    }

    pub fn lookup(&self, key: &FingerprintKey) -> Option<&LocationRecord> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &FingerprintKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or overwrites an entry, then flushes the whole cache. On a
    /// flush error the in-memory entry is kept.
    pub fn put(&mut self, key: FingerprintKey, record: LocationRecord) -> Result<(), CacheError> {
        self.entries.insert(key, record);
        self.flush()
    }

    /// Merges many entries with a single flush.
    pub fn extend(
        &mut self,
        records: impl IntoIterator<Item = (FingerprintKey, LocationRecord)>,
    ) -> Result<(), CacheError> {
        self.entries.extend(records);
        self.flush()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, FingerprintKey, LocationRecord> {
        self.entries.iter()
    }

    fn flush(&self) -> Result<(), CacheError> {
        let document = DocumentRef {
            version: STORAGE_VERSION,
            location_cache: self
                .entries
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect(),
        };
        let data = serde_json::to_vec(&document).map_err(CacheError::Encode)?;
        self.store.save(&data).map_err(CacheError::Persist)
    }
}

fn decode(data: &[u8]) -> HashMap<FingerprintKey, LocationRecord> {
    let version = match serde_json::from_slice::<Header>(data) {
        Ok(x) => x.version,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring undecodable location cache");
            return HashMap::new();
        }
    };
    if version != STORAGE_VERSION {
        tracing::warn!(version, "ignoring location cache with unknown version");
        return HashMap::new();
    }

    let document = match serde_json::from_slice::<Document>(data) {
        Ok(x) => x,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring undecodable location cache");
            return HashMap::new();
        }
    };

    let mut entries = HashMap::with_capacity(document.location_cache.len());
    for (raw, value) in document.location_cache {
        let key = FingerprintKey::from(raw);
        if key.is_empty() {
            tracing::warn!("dropping cached location without usable BSSIDs");
            continue;
        }
        match serde_json::from_value::<LocationRecord>(value) {
            Ok(record) if record.is_valid() => {
                entries.insert(key, record);
            }
            Ok(record) => {
                tracing::warn!(%key, ?record, "dropping cached location with invalid coordinates")
            }
            Err(e) => tracing::warn!(%key, error = %e, "dropping undecodable cached location"),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        fingerprint::{Bssid, Fingerprint},
        storage::MemoryStore,
    };

    struct BrokenStore;

    impl Store for BrokenStore {
        fn load(&self) -> io::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn save(&self, _: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    fn key(macs: &[&str]) -> FingerprintKey {
        macs.iter()
            .filter_map(|x| Bssid::new(x))
            .collect::<Fingerprint>()
            .key()
    }

    fn stored(store: &MemoryStore) -> Value {
        serde_json::from_slice(&store.contents().unwrap()).unwrap()
    }

    #[test]
    fn missing_store_is_empty() {
        let cache = LocationCache::load(Arc::new(MemoryStore::new())).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn put_persists_whole_cache() {
        let store = Arc::new(MemoryStore::new());
        let mut cache = LocationCache::load(store.clone()).unwrap();
        let a = key(&["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02"]);
        let b = key(&["11:22:33:44:55:66"]);
        cache.put(a.clone(), LocationRecord::new(37.7749, -122.4194, 25.0)).unwrap();
        cache.put(b.clone(), LocationRecord::new(51.5074, -0.1278, 30.0)).unwrap();

        assert_eq!(
            stored(&store),
            json!({
                "version": 1,
                "location_cache": {
                    "11:22:33:44:55:66": {"latitude": 51.5074, "longitude": -0.1278, "accuracy": 30.0},
                    "AA:BB:CC:DD:EE:01|AA:BB:CC:DD:EE:02": {"latitude": 37.7749, "longitude": -122.4194, "accuracy": 25.0},
                }
            })
        );
        assert_eq!(cache.lookup(&a).unwrap().latitude, 37.7749);
    }

    #[test]
    fn reload() {
        let store = Arc::new(MemoryStore::new());
        let a = key(&["AA:BB:CC:DD:EE:01"]);
        let mut cache = LocationCache::load(store.clone()).unwrap();
        cache.put(a.clone(), LocationRecord::new(1.0, 2.0, 3.0)).unwrap();

        let cache = LocationCache::load(store).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&a), Some(&LocationRecord::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn overwrite() {
        let mut cache = LocationCache::load(Arc::new(MemoryStore::new())).unwrap();
        let a = key(&["AA:BB:CC:DD:EE:01"]);
        cache.put(a.clone(), LocationRecord::new(1.0, 2.0, 3.0)).unwrap();
        cache.put(a.clone(), LocationRecord::new(4.0, 5.0, 6.0)).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&a).unwrap().latitude, 4.0);
    }

    #[test]
    fn unknown_version_ignored() {
        let store = MemoryStore::with_data(
            r#"{"version": 2, "location_cache": {"AA": {"latitude": 1.0, "longitude": 2.0, "accuracy": 3.0}}}"#,
        );
        let cache = LocationCache::load(Arc::new(store)).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn garbage_ignored() {
        for data in ["not json", "{}", r#"{"version": 1, "location_cache": 5}"#] {
            let cache = LocationCache::load(Arc::new(MemoryStore::with_data(data))).unwrap();
            assert!(cache.is_empty(), "{data}");
        }
    }

    #[test]
    fn stored_keys_are_canonicalised() {
        let store = MemoryStore::with_data(
            r#"{"version": 1, "location_cache": {"bb|aa": {"latitude": 1.0, "longitude": 2.0, "accuracy": 3.0}}}"#,
        );
        let cache = LocationCache::load(Arc::new(store)).unwrap();
        assert!(cache.contains(&key(&["AA", "BB"])));
    }

    #[test]
    fn bad_entries_dropped_individually() {
        let store = MemoryStore::with_data(
            r#"{"version": 1, "location_cache": {
                "AA": {"latitude": 1.0, "longitude": 2.0, "accuracy": 3.0},
                "BB": {"latitude": null, "longitude": 0.0, "accuracy": 1.0},
                "CC": {"latitude": 95.0, "longitude": 0.0, "accuracy": 1.0},
                "DD": "north",
                "": {"latitude": 1.0, "longitude": 2.0, "accuracy": 3.0}
            }}"#,
        );
        let cache = LocationCache::load(Arc::new(store)).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key(&["AA"])));
    }

    #[test]
    fn failed_flush_keeps_entry() {
        let mut cache = LocationCache::load(Arc::new(BrokenStore)).unwrap();
        let a = key(&["AA:BB:CC:DD:EE:01"]);
        let err = cache
            .put(a.clone(), LocationRecord::new(1.0, 2.0, 3.0))
            .unwrap_err();
        assert!(matches!(err, CacheError::Persist(_)));
        assert!(cache.contains(&a));
    }

    #[test]
    fn extend_flushes_once() {
        let store = Arc::new(MemoryStore::new());
        let mut cache = LocationCache::load(store.clone()).unwrap();
        cache
            .extend([
                (key(&["A"]), LocationRecord::new(1.0, 1.0, 1.0)),
                (key(&["B"]), LocationRecord::new(2.0, 2.0, 2.0)),
            ])
            .unwrap();
        assert_eq!(stored(&store)["location_cache"].as_object().unwrap().len(), 2);
    }
}
