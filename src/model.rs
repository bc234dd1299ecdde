use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// A single access point as reported by a device, in Google Geolocation API
/// format. Fields other than the MAC address and signal strength are kept so
/// they can be forwarded to the provider untouched.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<Number>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccessPoint {
    pub fn new(mac_address: &str, signal_strength: i32) -> Self {
        Self {
            mac_address: Some(mac_address.to_string()),
            signal_strength: Some(signal_strength.into()),
            extra: Map::new(),
        }
    }
}

/// Attribute set of a tracked device.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Attributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi_access_points: Option<Vec<AccessPoint>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Attributes {
    pub fn with_access_points(aps: Vec<AccessPoint>) -> Self {
        Self {
            wifi_access_points: Some(aps),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("invalid location: latitude {latitude}, longitude {longitude}, accuracy {accuracy}")]
pub struct InvalidLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

/// Resolved position of a fingerprint. Accuracy is a radius in meters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LocationRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

impl LocationRecord {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: accuracy.max(0.0),
        }
    }

    /// Like `new`, but rejects coordinates that cannot be stored or mapped:
    /// non-finite values, latitude outside ±90 and longitude outside ±180.
    pub fn try_new(latitude: f64, longitude: f64, accuracy: f64) -> Result<Self, InvalidLocation> {
        let record = Self::new(latitude, longitude, accuracy);
        if record.is_valid() && !accuracy.is_nan() {
            Ok(record)
        } else {
            Err(InvalidLocation {
                latitude,
                longitude,
                accuracy,
            })
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.accuracy.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn point(&self) -> geo::Point {
        geo::Point::new(self.longitude, self.latitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_point_passthrough() {
        let raw = r#"{"macAddress":"AA:BB:CC:DD:EE:01","signalStrength":-45,"channel":11}"#;
        let ap: AccessPoint = serde_json::from_str(raw).unwrap();
        assert_eq!(ap.mac_address.as_deref(), Some("AA:BB:CC:DD:EE:01"));
        assert_eq!(ap.signal_strength, Some(Number::from(-45)));
        assert_eq!(ap.extra["channel"], 11);

        let value = serde_json::to_value(&ap).unwrap();
        assert_eq!(value, serde_json::from_str::<Value>(raw).unwrap());
    }

    #[test]
    fn attributes_keep_unrelated_fields() {
        let attrs: Attributes =
            serde_json::from_str(r#"{"battery": 80, "source_type": "gps"}"#).unwrap();
        assert!(attrs.wifi_access_points.is_none());
        assert_eq!(attrs.extra["battery"], 80);
    }

    #[test]
    fn fractional_signal_strength_is_kept() {
        let raw = r#"{"macAddress":"AA:BB:CC:DD:EE:01","signalStrength":-45.5}"#;
        let ap: AccessPoint = serde_json::from_str(raw).unwrap();
        assert_eq!(ap.signal_strength.as_ref().unwrap().as_f64(), Some(-45.5));
        assert_eq!(
            serde_json::to_value(&ap).unwrap(),
            serde_json::from_str::<Value>(raw).unwrap()
        );

        let attrs: Attributes = serde_json::from_value(serde_json::json!({
            "wifi_access_points": [{"macAddress": "AA", "signalStrength": -71.25}]
        }))
        .unwrap();
        assert_eq!(attrs.wifi_access_points.unwrap().len(), 1);
    }

    #[test]
    fn rejects_unstorable_coordinates() {
        assert!(LocationRecord::try_new(37.7749, -122.4194, 25.0).is_ok());
        assert!(LocationRecord::try_new(90.0, -180.0, 0.0).is_ok());
        for (lat, lng, acc) in [
            (f64::NAN, 0.0, 1.0),
            (0.0, f64::INFINITY, 1.0),
            (0.0, 0.0, f64::NAN),
            (0.0, 0.0, f64::INFINITY),
            (90.5, 0.0, 1.0),
            (0.0, -181.0, 1.0),
        ] {
            assert!(LocationRecord::try_new(lat, lng, acc).is_err(), "{lat},{lng},{acc}");
        }
    }

    #[test]
    fn negative_accuracy_clamped() {
        assert_eq!(LocationRecord::new(1.0, 2.0, -5.0).accuracy, 0.0);
    }
}
