use std::io::Write;

use anyhow::Result;

use super::Row;
use crate::cache::LocationCache;

pub fn run(cache: &LocationCache, output: impl Write) -> Result<()> {
    let mut entries: Vec<_> = cache.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut writer = csv::Writer::from_writer(output);
    for (key, record) in entries {
        writer.serialize(Row {
            key: key.to_string(),
            latitude: record.latitude,
            longitude: record.longitude,
            accuracy: record.accuracy,
        })?;
    }
    writer.flush()?;

    Ok(())
}
