use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use geolog_core::api::{HttpLocationApi, LocationApi};
use geolog_core::config::{ClientConfig, TimePeriod};
use geolog_core::db::QueueEntry;
use geolog_core::geo::GeoPoint;
use geolog_core::services::SampleQueue;
use geolog_core::{LocationRecord, LocationSample};
use serde::Serialize;

use crate::auth::{load_stored_session, AuthSession};
use crate::error::CliError;

/// Cap on local history rows read for stats and maps.
const LOCAL_HISTORY_LIMIT: usize = 100_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingItem {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub fn pending_item(sample: &LocationSample) -> PendingItem {
    PendingItem {
        id: sample.id.to_string(),
        lat: sample.lat,
        lng: sample.lng,
        altitude: sample.altitude,
        timestamp: sample.captured_at.to_rfc3339(),
        attempts: None,
        last_error: None,
    }
}

pub fn dead_letter_item(entry: &QueueEntry) -> PendingItem {
    PendingItem {
        attempts: Some(entry.attempts),
        last_error: entry.last_error.clone(),
        ..pending_item(&entry.sample)
    }
}

pub fn format_sample_line(sample: &LocationSample, now: DateTime<Utc>) -> String {
    let id = sample.id.to_string();
    let short_id = id.chars().take(13).collect::<String>();
    let altitude = sample
        .altitude
        .map(|value| format!(" {value:.0}m"))
        .unwrap_or_default();
    format!(
        "{short_id}  {:>10.5} {:>11.5}{altitude}  ({})",
        sample.lat,
        sample.lng,
        format_relative_time(sample.captured_at.timestamp_millis(), now.timestamp_millis())
    )
}

pub fn format_dead_letter_line(entry: &QueueEntry, now: DateTime<Utc>) -> String {
    format!(
        "{}  attempts={} last_error={}",
        format_sample_line(&entry.sample, now),
        entry.attempts,
        entry.last_error.as_deref().unwrap_or("-")
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("GEOLOG_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("geolog").join("queue.db"))
        .ok_or_else(|| {
            CliError::InvalidArgument(
                "Could not resolve a data directory; pass --db-path".to_string(),
            )
        })
}

pub async fn open_queue(path: &Path, config: &ClientConfig) -> Result<SampleQueue, CliError> {
    Ok(SampleQueue::open_path(path)
        .await?
        .with_max_attempts(config.max_sync_attempts))
}

pub fn require_session(config: &ClientConfig) -> Result<AuthSession, CliError> {
    load_stored_session(config)?.ok_or(CliError::NotSignedIn)
}

/// HTTP client carrying the stored bearer token.
pub fn authorized_api(
    config: &ClientConfig,
    session: &AuthSession,
) -> Result<Arc<HttpLocationApi>, CliError> {
    let api = HttpLocationApi::new(&config.api_base_url, config.http_timeout)?
        .with_token(Some(session.token.clone()));
    Ok(Arc::new(api))
}

/// A route in capture order, from either the server or the local history.
pub enum Route {
    Remote(Vec<LocationRecord>),
    Local(Vec<LocationSample>),
}

impl Route {
    pub fn len(&self) -> usize {
        match self {
            Self::Remote(points) => points.len(),
            Self::Local(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub async fn load_route(
    config: &ClientConfig,
    db_path: &Path,
    period: TimePeriod,
    local: bool,
) -> Result<Route, CliError> {
    let session = require_session(config)?;
    let since = period.start(Utc::now());

    if local {
        let queue = open_queue(db_path, config).await?;
        let mut samples = queue
            .list_recent(&session.user.id, since, LOCAL_HISTORY_LIMIT)
            .await?;
        sort_by_capture(&mut samples);
        return Ok(Route::Local(samples));
    }

    let api = authorized_api(config, &session)?;
    let mut records = api.list_locations(since).await?;
    sort_by_capture(&mut records);
    Ok(Route::Remote(records))
}

fn sort_by_capture<P: GeoPoint>(points: &mut [P]) {
    points.sort_by_key(|point| point.timestamp());
}
