//! Client for a Google Geolocation API compatible provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AccessPoint, InvalidLocation, LocationRecord};

pub const GOOGLE_GEOLOCATION_API_URL: &str = "https://www.googleapis.com/geolocation/v1/geolocate";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to call geolocation provider: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("geolocation provider error ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("no location in geolocation provider response")]
    MissingLocation,
    #[error("invalid geolocation provider response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error(transparent)]
    InvalidLocation(#[from] InvalidLocation),
}

/// Resolves a Wi-Fi scan into a position. Implementations make exactly one
/// attempt per call.
#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn geolocate(&self, access_points: &[AccessPoint]) -> Result<LocationRecord, ProviderError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocationRequest<'a> {
    wifi_access_points: &'a [AccessPoint],
}

#[derive(Debug, Deserialize)]
struct LocationResponse {
    location: Option<Location>,
    #[serde(default)]
    accuracy: f64,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

pub struct GoogleGeolocator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GoogleGeolocator {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProviderError::Transport)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Geolocator for GoogleGeolocator {
    async fn geolocate(&self, access_points: &[AccessPoint]) -> Result<LocationRecord, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&LocationRequest {
                wifi_access_points: access_points,
            })
            .send()
            .await
            .map_err(ProviderError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(ProviderError::Transport)?;
        if status != StatusCode::OK {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_response(&body)
    }
}

/// Parses a successful (HTTP 200) provider body.
pub fn parse_response(body: &str) -> Result<LocationRecord, ProviderError> {
    let response: LocationResponse = serde_json::from_str(body).map_err(ProviderError::Decode)?;
    let location = response.location.ok_or(ProviderError::MissingLocation)?;
    Ok(LocationRecord::try_new(
        location.lat,
        location.lng,
        response.accuracy,
    )?)
}
