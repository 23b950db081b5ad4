//! Location sample model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::geo::haversine_distance;
use crate::util::truncate_to_millis;

/// Client-generated idempotency key for a sample, using UUID v7 (time-sortable).
///
/// The same key is sent with every delivery attempt and echoed back by the
/// server, so it is the only matching key between local and remote records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(Uuid);

impl SampleId {
    /// Create a new unique sample ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SampleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A single position observation.
///
/// Samples are immutable facts: after capture only `synced` ever changes, and
/// only from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    /// Unique identifier, scoped to the owner
    pub id: SampleId,
    /// User the sample belongs to
    pub owner_id: String,
    /// Latitude in degrees, [-90, 90]
    pub lat: f64,
    /// Longitude in degrees, [-180, 180]
    pub lng: f64,
    /// Altitude in meters, absent when the source did not report one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Capture time
    #[serde(rename = "timestamp")]
    pub captured_at: DateTime<Utc>,
    /// Local acknowledgment flag, never sent to the server
    #[serde(skip)]
    pub synced: bool,
}

impl LocationSample {
    /// Create a new, unsynced sample with a fresh identifier.
    #[must_use]
    pub fn new(
        owner_id: impl Into<String>,
        lat: f64,
        lng: f64,
        altitude: Option<f64>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SampleId::new(),
            owner_id: owner_id.into(),
            lat,
            lng,
            altitude,
            captured_at: truncate_to_millis(captured_at),
            synced: false,
        }
    }

    /// Great-circle distance to another sample, in meters.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        haversine_distance(self.lat, self.lng, other.lat, other.lng)
    }

    /// Check coordinate ranges and owner presence.
    pub fn validate(&self) -> Result<()> {
        if self.owner_id.trim().is_empty() {
            return Err(Error::InvalidInput("owner id must not be empty".into()));
        }
        validate_coordinates(self.lat, self.lng, self.altitude)
    }
}

/// Validate a latitude/longitude pair and an optional altitude.
pub fn validate_coordinates(lat: f64, lng: f64, altitude: Option<f64>) -> Result<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(Error::InvalidInput(format!(
            "latitude {lat} is outside [-90, 90]"
        )));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(Error::InvalidInput(format!(
            "longitude {lng} is outside [-180, 180]"
        )));
    }
    if altitude.is_some_and(|value| !value.is_finite()) {
        return Err(Error::InvalidInput("altitude must be a finite number".into()));
    }
    Ok(())
}
