//! Wire models shared by the backend and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LocationSample, SampleId};

/// A location as stored and returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub id: SampleId,
    pub user_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<&LocationSample> for LocationRecord {
    fn from(sample: &LocationSample) -> Self {
        Self {
            id: sample.id,
            user_id: sample.owner_id.clone(),
            lat: sample.lat,
            lng: sample.lng,
            altitude: sample.altitude,
            timestamp: sample.captured_at,
        }
    }
}

/// Body of `POST /api/location`.
///
/// The owner is taken from the bearer token; a client-supplied `id` makes the
/// request idempotent, and an absent `timestamp` means "now".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLocationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SampleId>,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<&LocationSample> for CreateLocationRequest {
    fn from(sample: &LocationSample) -> Self {
        Self {
            id: Some(sample.id),
            lat: sample.lat,
            lng: sample.lng,
            altitude: sample.altitude,
            timestamp: Some(sample.captured_at),
        }
    }
}

/// One entry of a batch ingest request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLocationInput {
    pub id: SampleId,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<&LocationSample> for SyncLocationInput {
    fn from(sample: &LocationSample) -> Self {
        Self {
            id: sample.id,
            lat: sample.lat,
            lng: sample.lng,
            altitude: sample.altitude,
            timestamp: sample.captured_at,
        }
    }
}

/// Body of `POST /api/location/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLocationsRequest {
    pub locations: Vec<SyncLocationInput>,
}

impl SyncLocationsRequest {
    /// Build a batch request from queued samples, preserving their order.
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a LocationSample>) -> Self {
        Self {
            locations: samples.into_iter().map(SyncLocationInput::from).collect(),
        }
    }
}

/// Response of `POST /api/location/sync`.
///
/// `locations` is the authoritative list of accepted entries; anything the
/// client sent that is not echoed here was not accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLocationsResponse {
    pub success: bool,
    pub synced: usize,
    pub locations: Vec<LocationRecord>,
    #[serde(default)]
    pub rejected: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::now_millis;

    #[test]
    fn sync_request_uses_camel_case_wire_names() {
        let sample = LocationSample::new("user-1", 50.45, 30.52, None, now_millis());
        let request = SyncLocationsRequest::from_samples([&sample]);
        let json = serde_json::to_value(&request).unwrap();

        let entry = &json["locations"][0];
        assert_eq!(entry["id"], sample.id.to_string());
        assert_eq!(entry["lat"], 50.45);
        assert!(entry.get("altitude").is_none());
        assert!(entry.get("userId").is_none());
    }

    #[test]
    fn sync_response_parses_server_payload() {
        let id = SampleId::new();
        let payload = format!(
            r#"{{"success":true,"synced":1,"locations":[{{"id":"{id}","userId":"u","lat":1.0,"lng":2.0,"timestamp":"2024-05-01T10:00:00.000Z"}}]}}"#
        );
        let response: SyncLocationsResponse = serde_json::from_str(&payload).unwrap();
        assert!(response.success);
        assert_eq!(response.locations[0].id, id);
        assert_eq!(response.locations[0].altitude, None);
        assert_eq!(response.rejected, 0);
    }
}
