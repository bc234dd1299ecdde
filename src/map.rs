//! Coverage map of the location cache as H3 cells.

use std::{collections::BTreeSet, fs, path::PathBuf};

use anyhow::{Context, Result};
use h3o::{geom::ToGeo, CellIndex, LatLng, Resolution};

use crate::cache::LocationCache;

pub const DEFAULT_RESOLUTION: u8 = 8;

pub fn cells(cache: &LocationCache, resolution: Resolution) -> BTreeSet<CellIndex> {
    let mut cells = BTreeSet::new();
    for (key, record) in cache.iter() {
        match LatLng::new(record.latitude, record.longitude) {
            Ok(loc) => {
                cells.insert(loc.to_cell(resolution));
            }
            Err(e) => tracing::warn!(%key, error = %e, "skipping invalid cached coordinate"),
        }
    }
    cells
}

/// Writes `<resolution>.geojson` and returns its path.
pub fn run(cache: &LocationCache, resolution: u8) -> Result<PathBuf> {
    let resolution = Resolution::try_from(resolution).context("Invalid H3 resolution")?;
    let cells = cells(cache, resolution);
    let count = cells.len();

    let name = PathBuf::from(format!("{}.geojson", resolution as u8));
    let x = cells.to_geojson()?;
    let x = x.to_string();
    fs::write(&name, x)?;

    tracing::info!(cells = count, path = %name.display(), "wrote coverage map");
    Ok(name)
}
