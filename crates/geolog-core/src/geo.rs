//! Geodesy helpers: great-circle distance, route statistics, and thinning.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{LocationRecord, LocationSample};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates using the haversine formula.
///
/// Inputs are in degrees, the result is in meters.
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Anything with a position and a capture time.
pub trait GeoPoint {
    fn lat(&self) -> f64;
    fn lng(&self) -> f64;
    fn timestamp(&self) -> DateTime<Utc>;
}

impl GeoPoint for LocationSample {
    fn lat(&self) -> f64 {
        self.lat
    }

    fn lng(&self) -> f64 {
        self.lng
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

impl GeoPoint for LocationRecord {
    fn lat(&self) -> f64 {
        self.lat
    }

    fn lng(&self) -> f64 {
        self.lng
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Aggregate statistics over an ordered route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteStats {
    pub total_distance_m: f64,
    pub total_time_s: f64,
    pub average_speed_mps: f64,
    pub points_count: usize,
}

/// Compute distance, duration and average speed for points in route order.
#[allow(clippy::cast_precision_loss)] // millisecond spans fit comfortably in f64
pub fn route_stats<P: GeoPoint>(points: &[P]) -> RouteStats {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return RouteStats {
            total_distance_m: 0.0,
            total_time_s: 0.0,
            average_speed_mps: 0.0,
            points_count: 0,
        };
    };

    let total_distance_m = points
        .windows(2)
        .map(|pair| haversine_distance(pair[0].lat(), pair[0].lng(), pair[1].lat(), pair[1].lng()))
        .sum::<f64>();
    let total_time_s =
        (last.timestamp() - first.timestamp()).num_milliseconds() as f64 / 1000.0;
    let average_speed_mps = if total_time_s > 0.0 {
        total_distance_m / total_time_s
    } else {
        0.0
    };

    RouteStats {
        total_distance_m,
        total_time_s,
        average_speed_mps,
        points_count: points.len(),
    }
}

/// Keep every `step`-th point, always retaining the first and the last.
///
/// A `step` of 0 or 1 keeps everything.
pub fn thin_route<P: Clone>(points: &[P], step: usize) -> Vec<P> {
    if step <= 1 || points.len() <= 2 {
        return points.to_vec();
    }

    let last_index = points.len() - 1;
    points
        .iter()
        .enumerate()
        .filter(|(index, _)| index % step == 0 || *index == last_index)
        .map(|(_, point)| point.clone())
        .collect()
}

/// Human readable distance: meters below one kilometer, kilometers above.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}

/// Human readable duration.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    if total < 60 {
        return format!("{total} s");
    }
    if total < 3600 {
        let (minutes, secs) = (total / 60, total % 60);
        return if secs > 0 {
            format!("{minutes} min {secs} s")
        } else {
            format!("{minutes} min")
        };
    }
    let (hours, minutes) = (total / 3600, (total % 3600) / 60);
    if minutes > 0 {
        format!("{hours} h {minutes} min")
    } else {
        format!("{hours} h")
    }
}

/// Human readable speed in km/h.
pub fn format_speed(meters_per_second: f64) -> String {
    format!("{:.1} km/h", meters_per_second * 3.6)
}
