//! Static HTML route maps.
//!
//! A route is rendered as a self-contained HTML document that loads the
//! provider's JavaScript from its CDN. Segments and markers are colored along
//! a gradient from red (oldest) to green (newest).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::GeoPoint;

/// Shown when there is nothing to center on.
const DEFAULT_CENTER: (f64, f64) = (50.4501, 30.5234);
const DEFAULT_ZOOM: u8 = 13;
const EMPTY_ZOOM: u8 = 10;

/// Newest first.
const GRADIENT: [&str; 15] = [
    "#10b981", "#22c55e", "#34d399", "#4ade80", "#65e6a3", "#86efac", "#a7f3d0", "#bef264",
    "#fde047", "#fbbf24", "#f59e0b", "#f97316", "#fb923c", "#f87171", "#ef4444",
];

/// Supported map backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MapProvider {
    #[default]
    Leaflet,
    GoogleMaps,
}

impl MapProvider {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Leaflet => "leaflet",
            Self::GoogleMaps => "google-maps",
        }
    }

    /// Render an HTML document showing `points` in capture order.
    pub fn render<P: GeoPoint>(self, points: &[P], config: &MapConfig) -> Result<String> {
        let mut route: Vec<MapPoint> = points
            .iter()
            .map(|point| MapPoint {
                lat: point.lat(),
                lng: point.lng(),
                timestamp: point.timestamp(),
                color: "",
            })
            .collect();
        route.sort_by_key(|point| point.timestamp);
        let total = route.len();
        for (index, point) in route.iter_mut().enumerate() {
            point.color = color_for_index(index, total);
        }

        let (center_lat, center_lng) = config
            .center
            .or_else(|| route.last().map(|point| (point.lat, point.lng)))
            .unwrap_or(DEFAULT_CENTER);
        let zoom = config
            .zoom
            .unwrap_or(if route.is_empty() { EMPTY_ZOOM } else { DEFAULT_ZOOM });

        let view = MapView {
            center: [center_lat, center_lng],
            zoom,
            points: route,
        };
        let data = serde_json::to_string(&view)?.replace("</", "<\\/");

        match self {
            Self::Leaflet => Ok(leaflet_document(&escape_html(&config.title), &data)),
            Self::GoogleMaps => {
                let api_key = config
                    .api_key
                    .as_deref()
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .ok_or_else(|| {
                        Error::Map("Google Maps requires an API key (GEOLOG_GOOGLE_MAPS_API_KEY)".into())
                    })?;
                if !api_key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
                {
                    return Err(Error::Map("Google Maps API key has invalid characters".into()));
                }
                Ok(google_maps_document(
                    &escape_html(&config.title),
                    &data,
                    api_key,
                ))
            }
        }
    }
}

impl fmt::Display for MapProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MapProvider {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "leaflet" => Ok(Self::Leaflet),
            "google-maps" => Ok(Self::GoogleMaps),
            other => Err(Error::Map(format!(
                "Unknown map provider `{other}` (expected leaflet or google-maps)"
            ))),
        }
    }
}

/// Rendering options.
#[derive(Clone, PartialEq, Default)]
pub struct MapConfig {
    pub title: String,
    pub zoom: Option<u8>,
    /// Overrides centering on the newest point
    pub center: Option<(f64, f64)>,
    pub api_key: Option<String>,
}

impl fmt::Debug for MapConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MapConfig")
            .field("title", &self.title)
            .field("zoom", &self.zoom)
            .field("center", &self.center)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Serialize)]
struct MapPoint {
    lat: f64,
    lng: f64,
    timestamp: DateTime<Utc>,
    color: &'static str,
}

#[derive(Serialize)]
struct MapView {
    center: [f64; 2],
    zoom: u8,
    points: Vec<MapPoint>,
}

/// Oldest point is red, newest green.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn color_for_index(index: usize, total: usize) -> &'static str {
    if total <= 1 {
        return GRADIENT[0];
    }
    let age = (total - 1 - index) as f64 / (total - 1) as f64;
    let slot = (age * (GRADIENT.len() - 1) as f64).floor() as usize;
    GRADIENT[slot.min(GRADIENT.len() - 1)]
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn leaflet_document(title: &str, data: &str) -> String {
    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<meta name="viewport" content="width=device-width, initial-scale=1">
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css" integrity="sha256-p4NxAoJBhIIN+hmNHrzRCf9tD/miZyoHS5obTRR9BMY=" crossorigin="">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js" integrity="sha256-20nQCchB9co0qIjJZRGuk2/Z9VM+kNiyxNV1lvTlZBo=" crossorigin=""></script>
<style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
const view = {data};
const map = L.map("map", {{ minZoom: 2, maxZoom: 19 }}).setView(view.center, view.zoom);
L.tileLayer("https://{{s}}.tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png", {{
  maxZoom: 19,
  attribution: '&copy; <a href="https://www.openstreetmap.org/copyright">OpenStreetMap</a> contributors'
}}).addTo(map);
const pts = view.points;
for (let i = 0; i + 1 < pts.length; i++) {{
  L.polyline([[pts[i].lat, pts[i].lng], [pts[i + 1].lat, pts[i + 1].lng]], {{ color: pts[i].color, weight: 4, opacity: 0.8 }}).addTo(map);
}}
pts.forEach((p, i) => {{
  const edge = i === 0 ? "S" : (i === pts.length - 1 ? "E" : null);
  const marker = edge
    ? L.marker([p.lat, p.lng], {{ icon: L.divIcon({{ className: "", html: '<div style="background:' + (edge === "S" ? "#10b981" : "#ef4444") + ';color:#fff;width:30px;height:30px;border-radius:50%;display:flex;align-items:center;justify-content:center;font-weight:bold;border:2px solid #fff">' + edge + '</div>', iconSize: [30, 30], iconAnchor: [15, 15] }}) }})
    : L.circleMarker([p.lat, p.lng], {{ radius: 6, color: "#fff", weight: 2, fillColor: p.color, fillOpacity: 1 }});
  marker.bindTooltip(new Date(p.timestamp).toLocaleString()).addTo(map);
}});
</script>
</body>
</html>
"##
    )
}

fn google_maps_document(title: &str, data: &str, api_key: &str) -> String {
    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<meta name="viewport" content="width=device-width, initial-scale=1">
<style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
const view = {data};
function initMap() {{
  const map = new google.maps.Map(document.getElementById("map"), {{
    center: {{ lat: view.center[0], lng: view.center[1] }},
    zoom: view.zoom,
    zoomControl: true
  }});
  const pts = view.points;
  for (let i = 0; i + 1 < pts.length; i++) {{
    new google.maps.Polyline({{
      path: [{{ lat: pts[i].lat, lng: pts[i].lng }}, {{ lat: pts[i + 1].lat, lng: pts[i + 1].lng }}],
      strokeColor: pts[i].color, strokeOpacity: 0.8, strokeWeight: 4, map
    }});
  }}
  pts.forEach((p, i) => {{
    const edge = i === 0 ? "S" : (i === pts.length - 1 ? "E" : undefined);
    new google.maps.Marker({{
      position: {{ lat: p.lat, lng: p.lng }},
      label: edge,
      title: new Date(p.timestamp).toLocaleString(),
      icon: edge ? undefined : {{ path: google.maps.SymbolPath.CIRCLE, scale: 5, fillColor: p.color, fillOpacity: 1, strokeColor: "#fff", strokeWeight: 2 }},
      map
    }});
  }});
}}
</script>
<script async src="https://maps.googleapis.com/maps/api/js?key={api_key}&callback=initMap"></script>
</body>
</html>
"##
    )
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::LocationSample;
    use crate::util::now_millis;

    fn route() -> Vec<LocationSample> {
        let start = now_millis();
        vec![
            LocationSample::new("u", 50.0, 30.0, None, start + Duration::seconds(60)),
            LocationSample::new("u", 50.1, 30.1, None, start),
        ]
    }

    #[test]
    fn provider_factory_fails_closed() {
        assert_eq!("leaflet".parse::<MapProvider>().unwrap(), MapProvider::Leaflet);
        assert_eq!(
            " google-maps ".parse::<MapProvider>().unwrap(),
            MapProvider::GoogleMaps
        );
        assert!(matches!("mapbox".parse::<MapProvider>(), Err(Error::Map(_))));
        assert!("".parse::<MapProvider>().is_err());
        assert_eq!(MapProvider::default(), MapProvider::Leaflet);
    }

    #[test]
    fn leaflet_document_centers_on_newest_point() {
        let html = MapProvider::Leaflet
            .render(&route(), &MapConfig::default())
            .unwrap();
        assert!(html.contains("leaflet.js"));
        assert!(html.contains(r#""center":[50.0,30.0]"#));
        assert!(html.contains(r#""zoom":13"#));
    }

    #[test]
    fn empty_route_uses_default_view() {
        let empty: Vec<LocationSample> = Vec::new();
        let html = MapProvider::Leaflet
            .render(&empty, &MapConfig::default())
            .unwrap();
        assert!(html.contains(r#""center":[50.4501,30.5234]"#));
        assert!(html.contains(r#""zoom":10"#));
    }

    #[test]
    fn google_maps_requires_api_key() {
        let error = MapProvider::GoogleMaps
            .render(&route(), &MapConfig::default())
            .unwrap_err();
        assert!(matches!(error, Error::Map(_)));

        let config = MapConfig {
            api_key: Some("AIza-test_key".to_string()),
            ..MapConfig::default()
        };
        let html = MapProvider::GoogleMaps.render(&route(), &config).unwrap();
        assert!(html.contains("key=AIza-test_key"));

        let bad = MapConfig {
            api_key: Some("key\"><script>".to_string()),
            ..MapConfig::default()
        };
        assert!(MapProvider::GoogleMaps.render(&route(), &bad).is_err());
    }

    #[test]
    fn title_is_escaped() {
        let config = MapConfig {
            title: "<b>Route</b>".to_string(),
            ..MapConfig::default()
        };
        let html = MapProvider::Leaflet.render(&route(), &config).unwrap();
        assert!(html.contains("<title>&lt;b&gt;Route&lt;/b&gt;</title>"));
    }

    #[test]
    fn gradient_runs_from_oldest_red_to_newest_green() {
        assert_eq!(color_for_index(0, 1), "#10b981");
        assert_eq!(color_for_index(0, 10), "#ef4444");
        assert_eq!(color_for_index(9, 10), "#10b981");
    }
}
