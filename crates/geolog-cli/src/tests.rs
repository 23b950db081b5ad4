use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use clap::Parser;
use geolog_core::api::{ApiError, ApiResult, LocationApi};
use geolog_core::config::{ClientConfig, TimePeriod};
use geolog_core::geo::RouteStats;
use geolog_core::map::MapProvider;
use geolog_core::models::{CreateLocationRequest, SyncLocationsRequest, SyncLocationsResponse};
use geolog_core::sampler::{JsonLinesSource, NoopInhibitor, SampleMode, Sampler, SamplerConfig};
use geolog_core::services::SampleQueue;
use geolog_core::sync::{LocationRecorder, RecordOutcome, SyncReport};
use geolog_core::{LocationRecord, LocationSample, SampleId};
use pretty_assertions::assert_eq;

use crate::cli::{AuthCommands, Cli, Commands, CompletionShell, PeriodArg, ProviderArg};
use crate::commands::common::{
    dead_letter_item, format_relative_time, format_sample_line, open_queue, pending_item,
};
use crate::commands::completions::render_completions;
use crate::commands::stats::format_stats_lines;
use crate::commands::sync::format_sync_report;
use crate::commands::track::{describe_outcome, record_samples};

fn sample_at(lat: f64, lng: f64, minute: u32) -> LocationSample {
    let captured_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap();
    LocationSample::new("user-1", lat, lng, Some(152.4), captured_at)
}

fn default_config() -> ClientConfig {
    ClientConfig::from_lookup(|_| None).unwrap()
}

/// Backend that is never reachable, so every recorded sample is queued.
struct OfflineApi;

fn offline() -> ApiError {
    ApiError::Status {
        status: 503,
        message: "unavailable".to_string(),
    }
}

impl LocationApi for OfflineApi {
    async fn create_location(&self, _request: &CreateLocationRequest) -> ApiResult<LocationRecord> {
        Err(offline())
    }

    async fn sync_locations(
        &self,
        _request: &SyncLocationsRequest,
    ) -> ApiResult<SyncLocationsResponse> {
        Err(offline())
    }

    async fn list_locations(
        &self,
        _since: Option<DateTime<Utc>>,
    ) -> ApiResult<Vec<LocationRecord>> {
        Err(offline())
    }

    async fn health(&self) -> ApiResult<()> {
        Err(offline())
    }
}

fn unthrottled_sampler() -> Sampler {
    let config = SamplerConfig {
        min_interval: std::time::Duration::ZERO,
        ..SamplerConfig::default()
    };
    Sampler::new(config).with_inhibitor(Arc::new(NoopInhibitor))
}

async fn offline_recorder(temp: &tempfile::TempDir) -> (LocationRecorder<OfflineApi>, SampleQueue) {
    let queue = open_queue(&temp.path().join("queue.db"), &default_config())
        .await
        .unwrap();
    (LocationRecorder::new(OfflineApi, queue.clone()), queue)
}

const FEED: &str = concat!(
    "{\"error\":\"permission_denied\"}\n",
    "{\"lat\":50.45,\"lng\":30.52,\"timestamp\":\"2024-05-01T12:00:00Z\"}\n",
    "{\"lat\":95.0,\"lng\":30.52,\"timestamp\":\"2024-05-01T12:01:00Z\"}\n",
    "{\"lat\":50.46,\"lng\":30.53,\"timestamp\":\"2024-05-01T12:02:00Z\"}\n",
);

#[test]
fn parses_track_flags() {
    let cli = Cli::try_parse_from([
        "geolog",
        "track",
        "--input",
        "fixes.jsonl",
        "--once",
        "--min-interval-ms",
        "2500",
        "--min-distance-m",
        "3.5",
    ])
    .unwrap();

    match cli.command {
        Commands::Track {
            input,
            once,
            min_interval_ms,
            min_distance_m,
        } => {
            assert_eq!(input.unwrap().to_str(), Some("fixes.jsonl"));
            assert!(once);
            assert_eq!(min_interval_ms, Some(2500));
            assert_eq!(min_distance_m, Some(3.5));
        }
        _ => panic!("expected track command"),
    }
}

#[test]
fn log_accepts_negative_coordinates() {
    let cli = Cli::try_parse_from(["geolog", "log", "--lat", "-33.86", "--lng", "-151.2"]).unwrap();
    match cli.command {
        Commands::Log { lat, lng, altitude } => {
            assert_eq!(lat, -33.86);
            assert_eq!(lng, -151.2);
            assert_eq!(altitude, None);
        }
        _ => panic!("expected log command"),
    }
}

#[test]
fn db_path_is_global() {
    let cli = Cli::try_parse_from(["geolog", "pending", "--db-path", "/tmp/q.db", "--dead"]).unwrap();
    assert_eq!(cli.db_path.unwrap().to_str(), Some("/tmp/q.db"));
    assert!(matches!(
        cli.command,
        Commands::Pending {
            dead: true,
            json: false
        }
    ));
}

#[test]
fn map_defaults_and_value_names() {
    let cli = Cli::try_parse_from([
        "geolog",
        "map",
        "--period",
        "3hours",
        "--provider",
        "google-maps",
        "-o",
        "route.html",
    ])
    .unwrap();
    match cli.command {
        Commands::Map {
            provider,
            period,
            detail,
            local,
            ..
        } => {
            assert_eq!(provider, Some(ProviderArg::GoogleMaps));
            assert_eq!(period, PeriodArg::ThreeHours);
            assert_eq!(detail, 1);
            assert!(!local);
        }
        _ => panic!("expected map command"),
    }
}

#[test]
fn map_requires_output() {
    assert!(Cli::try_parse_from(["geolog", "map"]).is_err());
}

#[test]
fn auth_login_requires_credentials() {
    assert!(Cli::try_parse_from(["geolog", "auth", "login", "--email", "a@b.co"]).is_err());

    let cli = Cli::try_parse_from([
        "geolog",
        "auth",
        "login",
        "--email",
        "a@b.co",
        "--password",
        "hunter22",
    ])
    .unwrap();
    assert!(matches!(
        cli.command,
        Commands::Auth {
            command: AuthCommands::Login { .. }
        }
    ));
}

#[test]
fn period_and_provider_args_map_to_core_types() {
    assert_eq!(TimePeriod::from(PeriodArg::FifteenMinutes), TimePeriod::FifteenMinutes);
    assert_eq!(TimePeriod::from(PeriodArg::NineHours), TimePeriod::NineHours);
    assert_eq!(TimePeriod::from(PeriodArg::All), TimePeriod::All);
    assert_eq!(MapProvider::from(ProviderArg::Leaflet), MapProvider::Leaflet);
}

#[test]
fn format_relative_time_buckets() {
    let now = 10 * 7 * 24 * 60 * 60 * 1000_i64;
    assert_eq!(format_relative_time(now - 5_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 86_400_000, now), "2d ago");
    assert_eq!(format_relative_time(now - 21 * 86_400_000, now), "3w ago");
    assert_eq!(format_relative_time(now + 60_000, now), "just now");
}

#[test]
fn format_sample_line_shows_coordinates_and_age() {
    let sample = sample_at(50.45, 30.5234, 0);
    let now = sample.captured_at + Duration::minutes(7);
    let line = format_sample_line(&sample, now);

    assert!(line.starts_with(&sample.id.to_string()[..13]));
    assert!(line.contains("50.45000"));
    assert!(line.contains("30.52340"));
    assert!(line.contains("152m"));
    assert!(line.ends_with("(7m ago)"));
}

#[test]
fn pending_items_serialize_camel_case() {
    let sample = sample_at(1.0, 2.0, 0);
    let value = serde_json::to_value(pending_item(&sample)).unwrap();
    assert_eq!(value["id"], sample.id.to_string());
    assert_eq!(value["timestamp"], "2024-05-01T12:00:00+00:00");
    assert!(value.get("attempts").is_none());

    let entry = geolog_core::db::QueueEntry {
        sample,
        attempts: 10,
        last_error: Some("HTTP 503".to_string()),
    };
    let value = serde_json::to_value(dead_letter_item(&entry)).unwrap();
    assert_eq!(value["attempts"], 10);
    assert_eq!(value["lastError"], "HTTP 503");
}

#[test]
fn sync_report_summary_mentions_leftovers() {
    let clean = SyncReport {
        success: true,
        synced: 3,
        attempted: 3,
        passes: 1,
        ..SyncReport::default()
    };
    assert_eq!(format_sync_report(&clean), "Synced 3 of 3 sample(s) in 1 pass(es)");

    let partial = SyncReport {
        success: false,
        synced: 1,
        attempted: 3,
        unacknowledged: 2,
        dead_lettered: 1,
        passes: 1,
        ..SyncReport::default()
    };
    assert_eq!(
        format_sync_report(&partial),
        "Synced 1 of 3 sample(s) in 1 pass(es), 2 unacknowledged, 1 dead-lettered"
    );
}

#[test]
fn stats_lines_use_human_units() {
    let stats = RouteStats {
        total_distance_m: 1_500.0,
        total_time_s: 1_800.0,
        average_speed_mps: 1_500.0 / 1_800.0,
        points_count: 4,
    };
    let lines = format_stats_lines(TimePeriod::OneHour, &stats);
    assert_eq!(lines[0], "Period:        1hour");
    assert_eq!(lines[1], "Points:        4");
    assert_eq!(lines[2], "Distance:      1.50 km");
    assert_eq!(lines[3], "Duration:      30 min");
    assert_eq!(lines[4], "Average speed: 3.0 km/h");
}

#[test]
fn describe_outcome_reports_delivery_state() {
    let sample = sample_at(50.0, 30.0, 5);
    assert_eq!(
        describe_outcome(&sample, &RecordOutcome::Queued),
        "2024-05-01 12:05:00 50.00000,30.00000 queued"
    );
}

#[test]
fn completions_reference_binary_name() {
    for shell in [CompletionShell::Bash, CompletionShell::Zsh, CompletionShell::Fish] {
        let script = String::from_utf8(render_completions(shell)).unwrap();
        assert!(script.contains("geolog"), "{shell:?} script misses bin name");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn requeue_returns_dead_letters_to_pending() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = default_config();
    config.max_sync_attempts = 2;
    let queue = open_queue(&temp.path().join("queue.db"), &config)
        .await
        .unwrap();

    let sample = sample_at(10.0, 20.0, 1);
    queue.enqueue(&sample).await.unwrap();
    for _ in 0..2 {
        queue.record_failed_attempt(&[sample.id], "HTTP 500").await;
    }

    assert!(queue.list_unsynced("user-1").await.is_empty());
    let dead = queue.list_dead_letters("user-1").await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].last_error.as_deref(), Some("HTTP 500"));

    assert_eq!(queue.requeue_dead_letters("user-1").await.unwrap(), 1);
    let pending = queue.list_unsynced("user-1").await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, sample.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn prune_keeps_pending_samples() {
    let temp = tempfile::tempdir().unwrap();
    let config = default_config();
    let queue = open_queue(&temp.path().join("queue.db"), &config)
        .await
        .unwrap();

    let delivered = sample_at(10.0, 20.0, 1);
    let pending = sample_at(10.1, 20.1, 2);
    queue.enqueue(&delivered).await.unwrap();
    queue.enqueue(&pending).await.unwrap();
    let acked = [delivered.id].into_iter().collect();
    assert_eq!(queue.mark_synced(&acked).await, 1);

    let removed = queue
        .prune_synced(Utc::now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let remaining: Vec<SampleId> = queue
        .list_unsynced("user-1")
        .await
        .into_iter()
        .map(|sample| sample.id)
        .collect();
    assert_eq!(remaining, vec![pending.id]);
    assert!(queue.get(&delivered.id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn continuous_tracking_skips_failed_readings() {
    let temp = tempfile::tempdir().unwrap();
    let (recorder, queue) = offline_recorder(&temp).await;
    let source = JsonLinesSource::new(FEED.as_bytes());

    let summary = record_samples(
        &recorder,
        &unthrottled_sampler(),
        source,
        "user-1",
        SampleMode::Continuous,
    )
    .await
    .unwrap();

    assert_eq!(summary.recorded, 2);
    let queued: Vec<f64> = queue
        .list_unsynced("user-1")
        .await
        .into_iter()
        .map(|sample| sample.lat)
        .collect();
    assert_eq!(queued, vec![50.45, 50.46]);
}

#[tokio::test(flavor = "multi_thread")]
async fn continuous_tracking_survives_recorder_errors() {
    let temp = tempfile::tempdir().unwrap();
    let (recorder, queue) = offline_recorder(&temp).await;
    let source = JsonLinesSource::new(FEED.as_bytes());

    // An empty owner fails validation, so every record call errors.
    let summary = record_samples(
        &recorder,
        &unthrottled_sampler(),
        source,
        "",
        SampleMode::Continuous,
    )
    .await
    .unwrap();

    assert_eq!(summary.recorded, 0);
    assert!(queue.list_unsynced("").await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn single_capture_returns_the_capture_error() {
    let temp = tempfile::tempdir().unwrap();
    let (recorder, queue) = offline_recorder(&temp).await;
    let source = JsonLinesSource::new(FEED.as_bytes());

    let result = record_samples(
        &recorder,
        &unthrottled_sampler(),
        source,
        "user-1",
        SampleMode::Once,
    )
    .await;

    assert!(result.is_err());
    assert!(queue.list_unsynced("user-1").await.is_empty());
}
