//! Connectivity tracking and the background sync loop.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

use super::{Backoff, BackoffPolicy, SyncReconciler, SyncReport};
use crate::api::LocationApi;

/// Publishes whether the backend is reachable.
pub struct ConnectivityMonitor<A> {
    api: A,
    probe_interval: Duration,
    tx: watch::Sender<bool>,
}

impl<A: LocationApi> ConnectivityMonitor<A> {
    /// Starts in the offline state until the first probe succeeds.
    pub fn new(api: A, probe_interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            api,
            probe_interval,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Probe the backend once and publish the result if it changed.
    pub async fn probe(&self) -> bool {
        let online = match self.api.health().await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!("Health probe failed: {}", error);
                false
            }
        };

        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                tracing::info!("Backend reachable");
            } else {
                tracing::warn!("Backend unreachable; samples will be queued");
            }
        }
        online
    }

    /// Probe on an interval until every subscriber is gone.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.tx.is_closed() {
                break;
            }
            self.probe().await;
        }
    }
}

/// Runs reconciliation passes on connectivity edges, on a timer, and as
/// backed-off retries after failures.
pub struct SyncDriver<A> {
    reconciler: Arc<SyncReconciler<A>>,
    online: watch::Receiver<bool>,
    sync_interval: Option<Duration>,
    backoff: Backoff,
}

impl<A: LocationApi> SyncDriver<A> {
    pub const fn new(
        reconciler: Arc<SyncReconciler<A>>,
        online: watch::Receiver<bool>,
        sync_interval: Option<Duration>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            reconciler,
            online,
            sync_interval,
            backoff: Backoff::new(backoff),
        }
    }

    /// Drive reconciliation until the connectivity channel closes.
    pub async fn run(mut self) {
        let mut was_online = *self.online.borrow_and_update();
        let mut retry_at = None;
        let mut periodic = self.sync_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        if was_online {
            retry_at = self.pass().await;
        }

        loop {
            tokio::select! {
                changed = self.online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = *self.online.borrow_and_update();
                    if now_online && !was_online {
                        tracing::info!("Connectivity restored; syncing queued samples");
                        self.backoff.reset();
                        retry_at = self.pass().await;
                    } else if !now_online {
                        retry_at = None;
                    }
                    was_online = now_online;
                }
                () = tick(periodic.as_mut()), if was_online => {
                    retry_at = self.pass().await;
                }
                () = wait_until(retry_at), if was_online => {
                    retry_at = self.pass().await;
                }
            }
        }

        tracing::debug!("Sync driver stopped");
    }

    /// Run one reconciliation and return when to retry, if it failed.
    async fn pass(&mut self) -> Option<Instant> {
        let report: SyncReport = self.reconciler.reconcile().await;
        if report.success {
            self.backoff.reset();
            return None;
        }

        let delay = self.backoff.record_failure();
        tracing::info!(
            failures = self.backoff.failures(),
            retry_in_secs = delay.as_secs(),
            "Sync failed; scheduling retry"
        );
        Some(Instant::now() + delay)
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
