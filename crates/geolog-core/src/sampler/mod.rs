//! Position sampling with throttling.
//!
//! A [`Sampler`] drives a [`PositionSource`] on a spawned task and emits
//! [`LocationSample`]s over a channel. Readings that arrive too soon after the
//! last emitted sample, or too soon and too close to it, are dropped by the
//! [`SuppressionFilter`].

mod source;
mod wake_lock;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::geo::haversine_distance;
use crate::models::LocationSample;

pub use source::{CaptureError, JsonLinesSource, PositionSource, RawPosition};
pub use wake_lock::{NoopInhibitor, SleepInhibitor, SystemdInhibitor, WakeLock};

const CHANNEL_CAPACITY: usize = 64;
const WAKE_LOCK_REASON: &str = "Continuous location tracking";

/// Throttling and acquisition settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Readings closer than this to the last emitted sample are always dropped
    pub min_interval: Duration,
    /// Between one and two intervals, readings must also move this far (meters)
    pub min_distance_m: f64,
    /// How long a single-shot capture waits for a fix
    pub acquire_timeout: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(5_000),
            min_distance_m: 5.0,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Decides which readings become samples.
#[derive(Debug, Clone)]
pub struct SuppressionFilter {
    min_interval_ms: i64,
    min_distance_m: f64,
    last: Option<(DateTime<Utc>, f64, f64)>,
}

impl SuppressionFilter {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            min_interval_ms: i64::try_from(config.min_interval.as_millis()).unwrap_or(i64::MAX),
            min_distance_m: config.min_distance_m,
            last: None,
        }
    }

    /// Returns `true` and remembers the reading if it should be emitted.
    ///
    /// A reading is dropped iff less than one interval has elapsed since the
    /// last emitted sample, or less than two intervals have elapsed and it is
    /// closer than the minimum distance. Elapsed time is measured between
    /// capture timestamps.
    pub fn admit(&mut self, lat: f64, lng: f64, captured_at: DateTime<Utc>) -> bool {
        if let Some((last_at, last_lat, last_lng)) = self.last {
            let elapsed_ms = (captured_at - last_at).num_milliseconds();
            if elapsed_ms < self.min_interval_ms {
                return false;
            }
            if elapsed_ms < self.min_interval_ms.saturating_mul(2)
                && haversine_distance(last_lat, last_lng, lat, lng) < self.min_distance_m
            {
                return false;
            }
        }

        self.last = Some((captured_at, lat, lng));
        true
    }
}

/// How long a sampler keeps watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// Exactly one sample or one error, then the stream ends
    Once,
    /// Samples until stopped or the source ends
    Continuous,
}

/// Item emitted by a running sampler.
pub type SampleResult = Result<LocationSample, CaptureError>;

/// Starts sampling tasks.
#[derive(Clone)]
pub struct Sampler {
    config: SamplerConfig,
    inhibitor: Arc<dyn SleepInhibitor>,
}

impl Sampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            inhibitor: Arc::new(SystemdInhibitor),
        }
    }

    #[must_use]
    pub fn with_inhibitor(mut self, inhibitor: Arc<dyn SleepInhibitor>) -> Self {
        self.inhibitor = inhibitor;
        self
    }

    pub const fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Spawn a sampling task for `owner_id`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<S: PositionSource>(
        &self,
        source: S,
        owner_id: impl Into<String>,
        mode: SampleMode,
    ) -> SamplerHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let owner_id = owner_id.into();
        let config = self.config.clone();

        let task = match mode {
            SampleMode::Once => tokio::spawn(capture_once(source, owner_id, config, tx)),
            SampleMode::Continuous => tokio::spawn(watch(
                source,
                owner_id,
                config,
                Arc::clone(&self.inhibitor),
                tx,
            )),
        };

        SamplerHandle { rx, task }
    }
}

/// Receiving end of a running sampler. Dropping it stops the task.
pub struct SamplerHandle {
    rx: mpsc::Receiver<SampleResult>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Next sample or capture error; `None` once the sampler has finished.
    pub async fn recv(&mut self) -> Option<SampleResult> {
        self.rx.recv().await
    }

    /// Stop the task and wait until it has released its resources.
    pub async fn stop(mut self) {
        self.rx.close();
        self.task.abort();
        if let Err(error) = (&mut self.task).await {
            if !error.is_cancelled() {
                tracing::warn!("Sampler task failed: {}", error);
            }
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn to_sample(owner_id: &str, raw: RawPosition) -> LocationSample {
    LocationSample::new(owner_id, raw.lat, raw.lng, raw.altitude, raw.timestamp)
}

async fn capture_once<S: PositionSource>(
    mut source: S,
    owner_id: String,
    config: SamplerConfig,
    tx: mpsc::Sender<SampleResult>,
) {
    let result = match tokio::time::timeout(config.acquire_timeout, source.next_position()).await {
        Ok(Some(Ok(raw))) => Ok(to_sample(&owner_id, raw)),
        Ok(Some(Err(error))) => Err(error),
        Ok(None) => Err(CaptureError::SourceUnavailable(
            "source ended before reporting a fix".to_string(),
        )),
        Err(_) => Err(CaptureError::Timeout),
    };

    if let Err(error) = &result {
        tracing::warn!("Single-shot capture failed: {}", error);
    }
    tx.send(result).await.ok();
}

async fn watch<S: PositionSource>(
    mut source: S,
    owner_id: String,
    config: SamplerConfig,
    inhibitor: Arc<dyn SleepInhibitor>,
    tx: mpsc::Sender<SampleResult>,
) {
    let _wake_lock = match inhibitor.acquire(WAKE_LOCK_REASON) {
        Ok(lock) => Some(lock),
        Err(error) => {
            tracing::warn!("Could not acquire wake lock, continuing without it: {}", error);
            None
        }
    };

    let mut filter = SuppressionFilter::new(&config);
    let mut suppressed = 0u64;

    loop {
        let next = tokio::select! {
            () = tx.closed() => break,
            next = source.next_position() => next,
        };

        let item = match next {
            None => break,
            Some(Err(error)) => {
                tracing::warn!("Position capture failed: {}", error);
                Err(error)
            }
            Some(Ok(raw)) => {
                if !filter.admit(raw.lat, raw.lng, raw.timestamp) {
                    suppressed += 1;
                    tracing::trace!(lat = raw.lat, lng = raw.lng, "Suppressed reading");
                    continue;
                }
                Ok(to_sample(&owner_id, raw))
            }
        };

        if tx.send(item).await.is_err() {
            break;
        }
    }

    tracing::debug!(suppressed, "Sampler stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_714_557_600_000 + millis).unwrap()
    }

    fn fix(lat: f64, lng: f64, millis: i64) -> Result<RawPosition, CaptureError> {
        Ok(RawPosition {
            lat,
            lng,
            altitude: None,
            timestamp: at(millis),
        })
    }

    /// Replays a fixed script, then either ends or stays pending forever.
    struct ScriptedSource {
        items: std::vec::IntoIter<Result<RawPosition, CaptureError>>,
        hang_when_done: bool,
    }

    impl ScriptedSource {
        fn ending(items: Vec<Result<RawPosition, CaptureError>>) -> Self {
            Self {
                items: items.into_iter(),
                hang_when_done: false,
            }
        }

        fn hanging(items: Vec<Result<RawPosition, CaptureError>>) -> Self {
            Self {
                items: items.into_iter(),
                hang_when_done: true,
            }
        }
    }

    impl PositionSource for ScriptedSource {
        async fn next_position(&mut self) -> Option<Result<RawPosition, CaptureError>> {
            match self.items.next() {
                Some(item) => Some(item),
                None if self.hang_when_done => std::future::pending().await,
                None => None,
            }
        }
    }

    #[derive(Default)]
    struct CountingInhibitor {
        acquired: AtomicUsize,
        released: Arc<AtomicUsize>,
    }

    impl SleepInhibitor for CountingInhibitor {
        fn acquire(&self, _reason: &str) -> std::io::Result<WakeLock> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            let released = Arc::clone(&self.released);
            Ok(WakeLock::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    struct FailingInhibitor;

    impl SleepInhibitor for FailingInhibitor {
        fn acquire(&self, _reason: &str) -> std::io::Result<WakeLock> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no inhibitor"))
        }
    }

    fn sampler(inhibitor: Arc<dyn SleepInhibitor>) -> Sampler {
        Sampler::new(SamplerConfig::default()).with_inhibitor(inhibitor)
    }

    async fn collect(mut handle: SamplerHandle) -> Vec<SampleResult> {
        let mut items = Vec::new();
        while let Some(item) = handle.recv().await {
            items.push(item);
        }
        items
    }

    #[test]
    fn first_reading_is_always_admitted() {
        let mut filter = SuppressionFilter::new(&SamplerConfig::default());
        assert!(filter.admit(50.0, 30.0, at(0)));
    }

    #[test]
    fn readings_inside_min_interval_are_dropped() {
        let mut filter = SuppressionFilter::new(&SamplerConfig::default());
        assert!(filter.admit(50.0, 30.0, at(0)));
        // 3 s later and ~1 km away: still inside the interval
        assert!(!filter.admit(50.01, 30.0, at(3_000)));
    }

    #[test]
    fn between_one_and_two_intervals_distance_decides() {
        let mut filter = SuppressionFilter::new(&SamplerConfig::default());
        assert!(filter.admit(50.0, 30.0, at(0)));
        // 7 s later, ~1 m away
        assert!(!filter.admit(50.000_01, 30.0, at(7_000)));
        // 7 s later, ~11 m away
        assert!(filter.admit(50.0001, 30.0, at(7_000)));
    }

    #[test]
    fn after_two_intervals_stationary_reading_is_admitted() {
        let mut filter = SuppressionFilter::new(&SamplerConfig::default());
        assert!(filter.admit(50.0, 30.0, at(0)));
        assert!(filter.admit(50.0, 30.0, at(10_000)));
    }

    #[test]
    fn suppressed_readings_do_not_move_the_reference() {
        let mut filter = SuppressionFilter::new(&SamplerConfig::default());
        assert!(filter.admit(50.0, 30.0, at(0)));
        assert!(!filter.admit(50.0, 30.0, at(4_000)));
        // Measured from t=0, not t=4s
        assert!(filter.admit(50.0, 30.0, at(10_000)));
    }

    #[test]
    fn out_of_order_reading_is_dropped() {
        let mut filter = SuppressionFilter::new(&SamplerConfig::default());
        assert!(filter.admit(50.0, 30.0, at(60_000)));
        assert!(!filter.admit(51.0, 31.0, at(0)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn continuous_mode_applies_suppression_and_surfaces_errors() {
        let source = ScriptedSource::ending(vec![
            fix(50.0, 30.0, 0),
            fix(50.0, 30.0, 3_000),
            Err(CaptureError::PositionUnavailable("no satellites".to_string())),
            fix(50.0, 30.0, 7_000),
            fix(50.001, 30.0, 8_000),
            fix(50.001, 30.0, 20_000),
        ]);

        let handle = sampler(Arc::new(NoopInhibitor)).start(source, "user-1", SampleMode::Continuous);
        let items = collect(handle).await;

        assert_eq!(items.len(), 4);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.owner_id, "user-1");
        assert_eq!(first.captured_at, at(0));
        assert!(!first.synced);
        assert_eq!(
            items[1],
            Err(CaptureError::PositionUnavailable("no satellites".to_string()))
        );
        assert_eq!(items[2].as_ref().unwrap().captured_at, at(8_000));
        assert_eq!(items[3].as_ref().unwrap().captured_at, at(20_000));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn emitted_samples_never_go_back_in_time() {
        let source = ScriptedSource::ending(vec![
            fix(50.0, 30.0, 30_000),
            fix(50.1, 30.1, 10_000),
            fix(50.2, 30.2, 45_000),
        ]);

        let handle = sampler(Arc::new(NoopInhibitor)).start(source, "user-1", SampleMode::Continuous);
        let times: Vec<_> = collect(handle)
            .await
            .into_iter()
            .map(|item| item.unwrap().captured_at)
            .collect();

        assert_eq!(times, vec![at(30_000), at(45_000)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn once_mode_yields_exactly_one_item() {
        let source = ScriptedSource::ending(vec![fix(50.0, 30.0, 0), fix(51.0, 31.0, 60_000)]);
        let handle = sampler(Arc::new(NoopInhibitor)).start(source, "user-1", SampleMode::Once);
        let items = collect(handle).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());

        let source = ScriptedSource::ending(vec![Err(CaptureError::PermissionDenied)]);
        let handle = sampler(Arc::new(NoopInhibitor)).start(source, "user-1", SampleMode::Once);
        assert_eq!(collect(handle).await, vec![Err(CaptureError::PermissionDenied)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn once_mode_times_out() {
        let config = SamplerConfig {
            acquire_timeout: Duration::from_millis(50),
            ..SamplerConfig::default()
        };
        let handle = Sampler::new(config)
            .with_inhibitor(Arc::new(NoopInhibitor))
            .start(ScriptedSource::hanging(vec![]), "user-1", SampleMode::Once);

        assert_eq!(collect(handle).await, vec![Err(CaptureError::Timeout)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wake_lock_released_when_source_ends() {
        let inhibitor = Arc::new(CountingInhibitor::default());
        let released = Arc::clone(&inhibitor.released);

        let handle = sampler(inhibitor.clone()).start(
            ScriptedSource::ending(vec![fix(50.0, 30.0, 0)]),
            "user-1",
            SampleMode::Continuous,
        );
        collect(handle).await;

        assert_eq!(inhibitor.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wake_lock_released_on_stop() {
        let inhibitor = Arc::new(CountingInhibitor::default());
        let released = Arc::clone(&inhibitor.released);

        let mut handle = sampler(inhibitor.clone()).start(
            ScriptedSource::hanging(vec![fix(50.0, 30.0, 0)]),
            "user-1",
            SampleMode::Continuous,
        );
        assert!(handle.recv().await.unwrap().is_ok());
        assert_eq!(released.load(Ordering::SeqCst), 0);

        handle.stop().await;
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wake_lock_released_when_handle_dropped() {
        let inhibitor = Arc::new(CountingInhibitor::default());
        let released = Arc::clone(&inhibitor.released);

        let handle = sampler(inhibitor.clone()).start(
            ScriptedSource::hanging(vec![]),
            "user-1",
            SampleMode::Continuous,
        );
        drop(handle);

        for _ in 0..100 {
            if released.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wake_lock_failure_does_not_stop_sampling() {
        let handle = sampler(Arc::new(FailingInhibitor)).start(
            ScriptedSource::ending(vec![fix(50.0, 30.0, 0)]),
            "user-1",
            SampleMode::Continuous,
        );
        assert_eq!(collect(handle).await.len(), 1);
    }
}
