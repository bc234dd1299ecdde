use std::io::Read;

use anyhow::{Context, Result};

use super::Row;
use crate::{cache::LocationCache, fingerprint::FingerprintKey, model::LocationRecord};

/// Reads every row before touching the cache, so a bad row imports nothing.
pub fn run(cache: &mut LocationCache, input: impl Read) -> Result<usize> {
    let mut reader = csv::Reader::from_reader(input);
    let mut records = Vec::new();
    for (i, result) in reader.deserialize().enumerate() {
        let row: Row = result.with_context(|| format!("failed to parse row {i}"))?;
        let key = FingerprintKey::from(row.key);
        if key.is_empty() {
            tracing::warn!(row = i, "skipping row without usable BSSIDs");
            continue;
        }
        let record = LocationRecord::try_new(row.latitude, row.longitude, row.accuracy)
            .with_context(|| format!("invalid location in row {i}"))?;
        records.push((key, record));
    }

    let count = records.len();
    cache.extend(records)?;
    Ok(count)
}
