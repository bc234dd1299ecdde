//! Moving the location cache in and out as CSV.
//!
//! Useful to seed a fresh install from another machine's cache or to inspect
//! what has been resolved so far.

use std::io;

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};

use crate::cache::LocationCache;

mod export;
mod import;

#[derive(Debug, Subcommand)]
pub enum BulkCommand {
    /// Write every cached location to stdout as CSV
    Export,
    /// Merge CSV rows from stdin into the cache
    Import,
}

/// One cache entry as a CSV row
#[derive(Debug, Deserialize, Serialize)]
struct Row {
    key: String,
    latitude: f64,
    longitude: f64,
    accuracy: f64,
}

pub fn run(mut cache: LocationCache, command: BulkCommand) -> Result<()> {
    match command {
        BulkCommand::Export => {
            export::run(&cache, io::stdout().lock())?;
        }
        BulkCommand::Import => {
            let count = import::run(&mut cache, io::stdin().lock())?;
            tracing::info!(imported = count, total = cache.len(), "imported locations");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        fingerprint::FingerprintKey, model::LocationRecord, storage::MemoryStore,
    };

    #[test]
    fn export_import() {
        let mut source = LocationCache::load(Arc::new(MemoryStore::new())).unwrap();
        source
            .extend([
                (
                    FingerprintKey::from("AA:BB:CC:DD:EE:02|AA:BB:CC:DD:EE:01".to_string()),
                    LocationRecord::new(37.7749, -122.4194, 25.0),
                ),
                (
                    FingerprintKey::from("11:22:33:44:55:66".to_string()),
                    LocationRecord::new(51.5074, -0.1278, 30.0),
                ),
            ])
            .unwrap();

        let mut csv = Vec::new();
        export::run(&source, &mut csv).unwrap();
        assert_eq!(
            String::from_utf8(csv.clone()).unwrap(),
            "key,latitude,longitude,accuracy\n\
             11:22:33:44:55:66,51.5074,-0.1278,30.0\n\
             AA:BB:CC:DD:EE:01|AA:BB:CC:DD:EE:02,37.7749,-122.4194,25.0\n"
        );

        let store = Arc::new(MemoryStore::new());
        let mut target = LocationCache::load(store.clone()).unwrap();
        assert_eq!(import::run(&mut target, &csv[..]).unwrap(), 2);
        assert_eq!(target.len(), 2);
        assert!(store.contents().is_some());

        let key = FingerprintKey::from("AA:BB:CC:DD:EE:01|AA:BB:CC:DD:EE:02".to_string());
        assert_eq!(target.lookup(&key).unwrap().accuracy, 25.0);
    }

    #[test]
    fn import_skips_blank_keys() {
        let mut cache = LocationCache::load(Arc::new(MemoryStore::new())).unwrap();
        let csv = "key,latitude,longitude,accuracy\n,1.0,2.0,3.0\nAA,1.0,2.0,3.0\n";
        assert_eq!(import::run(&mut cache, csv.as_bytes()).unwrap(), 1);
    }

    #[test]
    fn import_rejects_non_finite_coordinates() {
        let store = Arc::new(MemoryStore::new());
        let mut cache = LocationCache::load(store.clone()).unwrap();
        cache
            .put(
                FingerprintKey::from("AA".to_string()),
                LocationRecord::new(1.0, 2.0, 3.0),
            )
            .unwrap();

        for row in ["BB,NaN,0.0,1.0", "BB,0.0,inf,1.0", "BB,0.0,0.0,NaN", "BB,91.0,0.0,1.0"] {
            let csv = format!("key,latitude,longitude,accuracy\nCC,4.0,5.0,6.0\n{row}\n");
            assert!(import::run(&mut cache, csv.as_bytes()).is_err(), "{row}");
        }
        assert_eq!(cache.len(), 1);

        let csv = "key,latitude,longitude,accuracy\nBB,4.0,5.0,6.0\n";
        assert_eq!(import::run(&mut cache, csv.as_bytes()).unwrap(), 1);
        assert_eq!(LocationCache::load(store).unwrap().len(), 2);
    }

    #[test]
    fn import_rejects_bad_rows() {
        let mut cache = LocationCache::load(Arc::new(MemoryStore::new())).unwrap();
        let csv = "key,latitude,longitude,accuracy\nAA,north,2.0,3.0\n";
        assert!(import::run(&mut cache, csv.as_bytes()).is_err());
        assert!(cache.is_empty());
    }
}
