//! Reconciliation of the local queue with the backend.
//!
//! [`SyncReconciler`] delivers every unsynced sample as one batch and marks
//! exactly the samples the server echoed back as synced. Passes never overlap:
//! triggers that arrive while a pass is running are folded into a single
//! follow-up pass.

mod backoff;
mod driver;
mod recorder;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::api::LocationApi;
use crate::models::{SampleId, SyncLocationsRequest};
use crate::services::SampleQueue;

pub use backoff::{Backoff, BackoffPolicy};
pub use driver::{ConnectivityMonitor, SyncDriver};
pub use recorder::{LocationRecorder, RecordOutcome};

const NOT_ACKNOWLEDGED: &str = "not acknowledged by server";

/// Outcome of a [`SyncReconciler::reconcile`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// The last pass reached the server and got a 2xx answer
    pub success: bool,
    /// Samples marked synced across all passes of this call
    pub synced: usize,
    /// Samples sent across all passes of this call
    pub attempted: usize,
    /// Samples sent but not echoed back
    pub unacknowledged: usize,
    /// Samples currently excluded from batches after too many failures
    pub dead_lettered: usize,
    /// Passes run by this call, including coalesced follow-ups
    pub passes: usize,
    /// Another call was already running; this trigger was folded into it
    pub coalesced: bool,
    /// Failure of the last pass, if any
    pub error: Option<String>,
}

impl SyncReport {
    fn coalesced() -> Self {
        Self {
            success: true,
            coalesced: true,
            ..Self::default()
        }
    }

    fn absorb(&mut self, pass: PassOutcome) {
        self.success = pass.error.is_none();
        self.synced += pass.synced;
        self.attempted += pass.attempted;
        self.unacknowledged += pass.unacknowledged;
        self.passes += 1;
        self.error = pass.error;
    }
}

#[derive(Debug, Default)]
struct PassOutcome {
    synced: usize,
    attempted: usize,
    unacknowledged: usize,
    error: Option<String>,
}

/// Releases the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight batch delivery of one owner's queued samples.
///
/// The API client carries that owner's credentials; samples of other owners
/// in the same queue are never sent through it.
pub struct SyncReconciler<A> {
    api: A,
    queue: SampleQueue,
    owner_id: String,
    in_flight: AtomicBool,
    rerun_requested: AtomicBool,
}

impl<A: LocationApi> SyncReconciler<A> {
    pub fn new(api: A, queue: SampleQueue, owner_id: impl Into<String>) -> Self {
        Self {
            api,
            queue,
            owner_id: owner_id.into(),
            in_flight: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
        }
    }

    pub const fn api(&self) -> &A {
        &self.api
    }

    pub const fn queue(&self) -> &SampleQueue {
        &self.queue
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// True while a pass is running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Deliver the unsynced set.
    ///
    /// If a pass is already running, this only requests one more pass from the
    /// running call and returns a report with `coalesced` set.
    pub async fn reconcile(&self) -> SyncReport {
        if !self.try_begin() {
            self.rerun_requested.store(true, Ordering::Release);
            // The running call may have finished between the two steps above.
            if !self.try_begin() {
                tracing::debug!("Sync already in flight; trigger coalesced");
                return SyncReport::coalesced();
            }
        }

        let mut report = SyncReport::default();
        loop {
            {
                let _guard = InFlightGuard(&self.in_flight);
                loop {
                    self.rerun_requested.store(false, Ordering::Release);
                    report.absorb(self.run_pass().await);
                    if !self.rerun_requested.load(Ordering::Acquire) {
                        break;
                    }
                    tracing::debug!("Running coalesced follow-up sync pass");
                }
            }

            // A trigger may have landed after the last check but before release.
            if !self.rerun_requested.load(Ordering::Acquire) || !self.try_begin() {
                break;
            }
        }

        report.dead_lettered = match self.queue.counts(&self.owner_id).await {
            Ok(counts) => counts.dead_lettered,
            Err(error) => {
                tracing::warn!("Failed to count dead-lettered samples: {}", error);
                0
            }
        };
        if report.dead_lettered > 0 {
            tracing::warn!(
                count = report.dead_lettered,
                "Samples dead-lettered after repeated delivery failures"
            );
        }
        report
    }

    fn try_begin(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn run_pass(&self) -> PassOutcome {
        let batch = self.queue.list_unsynced(&self.owner_id).await;
        if batch.is_empty() {
            tracing::debug!("Nothing to sync");
            return PassOutcome::default();
        }

        let request = SyncLocationsRequest::from_samples(&batch);
        let sent: Vec<SampleId> = batch.iter().map(|sample| sample.id).collect();
        tracing::info!(count = sent.len(), "Syncing queued samples");

        match self.api.sync_locations(&request).await {
            Ok(response) => {
                let sent_set: HashSet<SampleId> = sent.iter().copied().collect();
                let acknowledged: HashSet<SampleId> = response
                    .locations
                    .iter()
                    .map(|record| record.id)
                    .filter(|id| sent_set.contains(id))
                    .collect();
                let synced = self.queue.mark_synced(&acknowledged).await;

                let unacknowledged: Vec<SampleId> = sent
                    .iter()
                    .filter(|id| !acknowledged.contains(id))
                    .copied()
                    .collect();
                if !unacknowledged.is_empty() {
                    tracing::warn!(
                        count = unacknowledged.len(),
                        rejected = response.rejected,
                        "Server did not acknowledge every sample"
                    );
                    self.queue
                        .record_failed_attempt(&unacknowledged, NOT_ACKNOWLEDGED)
                        .await;
                }

                tracing::info!(synced, attempted = sent.len(), "Sync pass finished");
                PassOutcome {
                    synced,
                    attempted: sent.len(),
                    unacknowledged: unacknowledged.len(),
                    error: None,
                }
            }
            Err(error) => {
                tracing::warn!(count = sent.len(), "Sync pass failed: {}", error);
                // Without credentials the server never judged the batch.
                if !error.is_unauthorized() {
                    self.queue
                        .record_failed_attempt(&sent, &error.to_string())
                        .await;
                }
                PassOutcome {
                    synced: 0,
                    attempted: sent.len(),
                    unacknowledged: sent.len(),
                    error: Some(error.to_string()),
                }
            }
        }
    }
}
