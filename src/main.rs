use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::{
    cache::LocationCache,
    config::Config,
    devices::Registry,
    dispatch::{Dispatcher, Resolution},
    events::EventBus,
    geolocate::GoogleGeolocator,
    model::{AccessPoint, Attributes},
    storage::{FileStore, MemoryStore, Store},
    tracking::DeviceTracker,
};

mod api;
mod bulk;
mod cache;
mod config;
mod devices;
mod dispatch;
mod events;
mod fingerprint;
mod geolocate;
mod map;
mod model;
mod storage;
mod tracking;
mod trigger;

#[derive(Debug, Parser)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept device state updates and geolocation requests over HTTP
    Serve { port: Option<u16> },
    /// Geolocate a JSON array of access points read from a file or stdin
    Locate {
        input: Option<PathBuf>,
        #[arg(long)]
        force: bool,
        /// Use the stored cache but do not write to it
        #[arg(long)]
        ephemeral: bool,
    },
    /// Export or import the location cache
    Cache {
        #[clap(subcommand)]
        command: bulk::BulkCommand,
    },
    /// Write the H3 cells covered by the cache as GeoJSON
    Map {
        #[arg(long, default_value_t = map::DEFAULT_RESOLUTION)]
        resolution: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let path = match cli.config.as_deref() {
        Some(x) => x,
        None => Path::new("config.toml"),
    };
    let config = config::load(path)?;

    match cli.command {
        Command::Serve { port } => {
            let cache = open_cache(&config, false)?;
            serve(config, cache, port).await?;
        }
        Command::Locate {
            input,
            force,
            ephemeral,
        } => {
            let cache = open_cache(&config, ephemeral)?;
            locate(config, cache, input.as_deref(), force).await?;
        }
        Command::Cache { command } => bulk::run(open_cache(&config, false)?, command)?,
        Command::Map { resolution } => {
            map::run(&open_cache(&config, false)?, resolution)?;
        }
    };

    Ok(())
}

fn open_cache(config: &Config, ephemeral: bool) -> Result<LocationCache> {
    let file = FileStore::new(&config.storage_path);
    let store: Arc<dyn Store> = if ephemeral {
        match file.load().context("Failed to read location cache")? {
            Some(data) => Arc::new(MemoryStore::with_data(data)),
            None => Arc::new(MemoryStore::new()),
        }
    } else {
        Arc::new(file)
    };

    let cache = LocationCache::load(store).context("Failed to load location cache")?;
    tracing::info!(
        entries = cache.len(),
        path = %config.storage_path.display(),
        "loaded location cache"
    );
    Ok(cache)
}

fn geolocator(config: &Config) -> Result<Arc<GoogleGeolocator>> {
    let provider = &config.provider;
    let geolocator =
        GoogleGeolocator::new(&provider.endpoint, provider.api_key()?, provider.timeout())?;
    Ok(Arc::new(geolocator))
}

async fn serve(config: Config, cache: LocationCache, port: Option<u16>) -> Result<()> {
    let registry = Arc::new(Registry::new(&config.tracker_prefix));
    let dispatcher = Arc::new(Dispatcher::new(
        cache,
        DeviceTracker::new(),
        registry.clone(),
        geolocator(&config)?,
    ));
    let bus = Arc::new(EventBus::new());
    trigger::register(&bus, dispatcher.clone(), config.tracker_prefix.clone());

    let port = port.unwrap_or(config.http_port);
    tracing::info!(
        port,
        tracker_prefix = %config.tracker_prefix,
        "automatically geolocating device trackers with Wi-Fi data"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(dispatcher.clone()))
            .app_data(web::Data::from(registry.clone()))
            .app_data(web::Data::from(bus.clone()))
            .configure(api::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    Ok(())
}

async fn locate(
    config: Config,
    cache: LocationCache,
    input: Option<&Path>,
    force: bool,
) -> Result<()> {
    let data = match input {
        Some(path) => fs::read_to_string(path).context("Failed to read access points")?,
        None => io::read_to_string(io::stdin()).context("Failed to read access points")?,
    };
    let access_points: Vec<AccessPoint> =
        serde_json::from_str(&data).context("Failed to parse access points")?;

    let device_id = format!("{}local", config.tracker_prefix);
    let registry = Arc::new(Registry::new(&config.tracker_prefix));
    registry.update(&device_id, Attributes::with_access_points(access_points));

    let dispatcher = Dispatcher::new(
        cache,
        DeviceTracker::new(),
        registry,
        geolocator(&config)?,
    );
    let resolution = dispatcher.geolocate(&device_id, force).await?;

    let (source, location) = match resolution {
        Resolution::Cached(x) => ("cached", x),
        Resolution::Fetched(x) => ("fetched", x),
        Resolution::Unchanged => return Ok(()),
    };
    println!(
        "{},{} ±{}m ({source})",
        location.latitude, location.longitude, location.accuracy
    );

    Ok(())
}
