use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use geolog_core::api::LocationApi;
use geolog_core::config::ClientConfig;
use geolog_core::sampler::{
    CaptureError, JsonLinesSource, PositionSource, SampleMode, Sampler, SamplerConfig,
};
use geolog_core::sync::{
    ConnectivityMonitor, LocationRecorder, RecordOutcome, SyncDriver, SyncReconciler,
};
use geolog_core::LocationSample;

use crate::commands::common::{authorized_api, open_queue, require_session};
use crate::error::CliError;

const PROBE_INTERVAL: Duration = Duration::from_secs(15);
/// Periodic pass while tracking when `GEOLOG_SYNC_INTERVAL_SECS` is unset.
const TRACK_SYNC_INTERVAL: Duration = Duration::from_secs(60);

pub struct TrackOptions {
    pub input: Option<PathBuf>,
    pub once: bool,
    pub min_interval_ms: Option<u64>,
    pub min_distance_m: Option<f64>,
}

pub async fn run_track(
    options: TrackOptions,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let sampler_config = sampler_config(config, &options)?;
    let session = require_session(config)?;
    let queue = open_queue(db_path, config).await?;
    let api = authorized_api(config, &session)?;

    let monitor = ConnectivityMonitor::new(api.clone(), PROBE_INTERVAL);
    monitor.probe().await;
    let online = monitor.subscribe();
    let monitor_task = tokio::spawn(monitor.run());

    let reconciler = Arc::new(SyncReconciler::new(
        api.clone(),
        queue.clone(),
        session.user.id.clone(),
    ));
    let driver = SyncDriver::new(
        reconciler.clone(),
        online.clone(),
        config.sync_interval.or(Some(TRACK_SYNC_INTERVAL)),
        config.backoff.clone(),
    );
    let driver_task = tokio::spawn(driver.run());

    let recorder = LocationRecorder::new(api, queue.clone()).with_connectivity(online);
    let mode = if options.once {
        SampleMode::Once
    } else {
        SampleMode::Continuous
    };

    let sampler = Sampler::new(sampler_config);
    let result = match options.input.as_deref() {
        Some(path) => {
            let source = JsonLinesSource::open(path)
                .await
                .map_err(geolog_core::Error::from)?;
            record_samples(&recorder, &sampler, source, &session.user.id, mode).await
        }
        None => {
            let source = JsonLinesSource::stdin();
            record_samples(&recorder, &sampler, source, &session.user.id, mode).await
        }
    };

    driver_task.abort();
    monitor_task.abort();

    let report = reconciler.reconcile().await;
    let pending = queue.list_unsynced(&session.user.id).await.len();
    println!(
        "Recorded {} sample(s); final sync delivered {}; {} pending",
        result.as_ref().map_or(0, |summary| summary.recorded),
        report.synced,
        pending
    );
    if let Some(error) = report.error {
        tracing::warn!("Final sync incomplete: {}", error);
    }

    result.map(drop)
}

fn sampler_config(
    config: &ClientConfig,
    options: &TrackOptions,
) -> Result<SamplerConfig, CliError> {
    let mut sampler = config.sampler.clone();
    if let Some(ms) = options.min_interval_ms {
        sampler.min_interval = Duration::from_millis(ms);
    }
    if let Some(meters) = options.min_distance_m {
        if !meters.is_finite() || meters < 0.0 {
            return Err(CliError::InvalidArgument(
                "--min-distance-m must be a non-negative number".to_string(),
            ));
        }
        sampler.min_distance_m = meters;
    }
    Ok(sampler)
}

pub(crate) struct TrackSummary {
    pub(crate) recorded: usize,
}

/// Feed sampler output into the recorder until the source ends or ctrl-c.
///
/// In continuous mode a failed reading is reported and skipped; only a
/// single-shot capture returns its error.
pub(crate) async fn record_samples<S, A>(
    recorder: &LocationRecorder<A>,
    sampler: &Sampler,
    source: S,
    owner_id: &str,
    mode: SampleMode,
) -> Result<TrackSummary, CliError>
where
    S: PositionSource,
    A: LocationApi,
{
    let mut handle = sampler.start(source, owner_id, mode);
    let mut summary = TrackSummary { recorded: 0 };

    let outcome = loop {
        let next = tokio::select! {
            next = handle.recv() => next,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping sampler");
                break Ok(());
            }
        };

        let Some(next) = next else {
            break Ok(());
        };
        if let Err(error) = handle_reading(recorder, next, &mut summary).await {
            if mode == SampleMode::Once {
                break Err(error);
            }
            eprintln!("Skipping reading: {error}");
        }
    };

    handle.stop().await;
    outcome.map(|()| summary)
}

/// Record one sampler item. Errors cover this reading only.
async fn handle_reading<A: LocationApi>(
    recorder: &LocationRecorder<A>,
    next: Result<LocationSample, CaptureError>,
    summary: &mut TrackSummary,
) -> Result<(), CliError> {
    let sample = next.map_err(geolog_core::Error::from)?;
    let outcome = recorder.record(&sample).await?;
    println!("{}", describe_outcome(&sample, &outcome));
    summary.recorded += 1;
    Ok(())
}

pub fn describe_outcome(sample: &LocationSample, outcome: &RecordOutcome) -> String {
    let state = match outcome {
        RecordOutcome::Delivered(_) => "delivered",
        RecordOutcome::Queued => "queued",
    };
    format!(
        "{} {:.5},{:.5} {state}",
        sample.captured_at.format("%Y-%m-%d %H:%M:%S"),
        sample.lat,
        sample.lng
    )
}
