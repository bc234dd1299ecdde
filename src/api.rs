use actix_web::{error::InternalError, get, http::StatusCode, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    devices::Registry,
    dispatch::{DispatchError, Dispatcher, Resolution},
    events::{EventBus, StateChange},
    model::{Attributes, LocationRecord},
};

#[derive(Debug, Deserialize)]
struct GeolocateRequest {
    device_id: String,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
struct LocationResponse {
    location: Location,
    accuracy: f64,
}

impl From<LocationRecord> for LocationResponse {
    fn from(value: LocationRecord) -> Self {
        LocationResponse {
            location: Location {
                lat: value.latitude,
                lng: value.longitude,
            },
            accuracy: value.accuracy,
        }
    }
}

#[derive(Debug, Serialize)]
struct Location {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Serialize)]
struct GeolocateResponse {
    status: &'static str,
    #[serde(flatten)]
    location: Option<LocationResponse>,
}

impl From<Resolution> for GeolocateResponse {
    fn from(value: Resolution) -> Self {
        let status = match value {
            Resolution::Cached(_) => "cached",
            Resolution::Fetched(_) => "fetched",
            Resolution::Unchanged => "unchanged",
        };
        GeolocateResponse {
            status,
            location: value.location().map(Into::into),
        }
    }
}

fn dispatch_error(e: DispatchError) -> actix_web::Error {
    let status = match &e {
        DispatchError::UnknownDevice(_) => StatusCode::NOT_FOUND,
        DispatchError::MissingAccessPoints(_) | DispatchError::EmptyFingerprint(_) => {
            StatusCode::BAD_REQUEST
        }
        DispatchError::Provider(_) => StatusCode::BAD_GATEWAY,
        DispatchError::Sink(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    InternalError::new(e, status).into()
}

#[post("/v1/geolocate")]
pub async fn geolocate(
    data: web::Json<GeolocateRequest>,
    dispatcher: web::Data<Dispatcher>,
) -> actix_web::Result<HttpResponse> {
    let data = data.into_inner();
    let resolution = dispatcher
        .geolocate(&data.device_id, data.force)
        .await
        .map_err(dispatch_error)?;
    Ok(HttpResponse::Ok().json(GeolocateResponse::from(resolution)))
}

/// Replaces a device's attributes and notifies subscribers, which may
/// geolocate the device before this returns.
#[post("/v1/devices/{device_id}/state")]
pub async fn update_state(
    path: web::Path<String>,
    data: web::Json<Attributes>,
    registry: web::Data<Registry>,
    bus: web::Data<EventBus>,
) -> actix_web::Result<HttpResponse> {
    let device_id = path.into_inner();
    let new_state = data.into_inner();
    let old_state = registry.update(&device_id, new_state.clone());

    let listeners = bus
        .publish(StateChange {
            entity_id: device_id,
            old_state,
            new_state: Some(new_state),
        })
        .await;
    Ok(HttpResponse::Ok().json(json!({ "listeners": listeners })))
}

#[get("/v1/devices/{device_id}")]
pub async fn position(
    path: web::Path<String>,
    registry: web::Data<Registry>,
) -> actix_web::Result<HttpResponse> {
    match registry.position(&path) {
        Some(x) => Ok(HttpResponse::Ok().json(LocationResponse::from(x))),
        None => Ok(HttpResponse::NotFound().finish()),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(geolocate)
        .service(update_state)
        .service(position);
}
