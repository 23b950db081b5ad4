//! In-process stand-in for the backend used by sync tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::api::{ApiError, ApiResult, LocationApi};
use crate::models::{
    CreateLocationRequest, LocationRecord, SampleId, SyncLocationsRequest, SyncLocationsResponse,
};

pub(crate) struct MockApi {
    pub fail_sync: AtomicBool,
    pub fail_create: AtomicBool,
    pub unauthorized: AtomicBool,
    pub healthy: AtomicBool,
    pub sync_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub batches: Mutex<Vec<Vec<SampleId>>>,
    pub started: Notify,
    pub hold: Arc<tokio::sync::Mutex<()>>,
    dropped: Mutex<HashSet<SampleId>>,
    extra: Mutex<Vec<SampleId>>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            fail_sync: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            unauthorized: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            sync_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            started: Notify::new(),
            hold: Arc::new(tokio::sync::Mutex::new(())),
            dropped: Mutex::new(HashSet::new()),
            extra: Mutex::new(Vec::new()),
        }
    }
}

impl MockApi {
    /// Accept the batch but leave `id` out of the echo.
    pub fn drop_from_echo(&self, id: SampleId) {
        self.dropped.lock().unwrap().insert(id);
    }

    /// Echo an id the client never sent.
    pub fn echo_extra(&self, id: SampleId) {
        self.extra.lock().unwrap().push(id);
    }

    fn record(id: SampleId, lat: f64, lng: f64, altitude: Option<f64>, timestamp: DateTime<Utc>) -> LocationRecord {
        LocationRecord {
            id,
            user_id: "user-1".to_string(),
            lat,
            lng,
            altitude,
            timestamp,
        }
    }

    fn check_auth(&self) -> ApiResult<()> {
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 401,
                message: "Invalid token".to_string(),
            });
        }
        Ok(())
    }
}

impl LocationApi for MockApi {
    async fn create_location(&self, request: &CreateLocationRequest) -> ApiResult<LocationRecord> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth()?;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }
        Ok(Self::record(
            request.id.unwrap_or_default(),
            request.lat,
            request.lng,
            request.altitude,
            request.timestamp.unwrap_or_else(Utc::now),
        ))
    }

    async fn sync_locations(&self, request: &SyncLocationsRequest) -> ApiResult<SyncLocationsResponse> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        self.batches
            .lock()
            .unwrap()
            .push(request.locations.iter().map(|entry| entry.id).collect());
        self.started.notify_one();
        let _hold = self.hold.lock().await;

        self.check_auth()?;
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                message: "Internal server error".to_string(),
            });
        }

        let dropped = self.dropped.lock().unwrap().clone();
        let mut locations: Vec<LocationRecord> = request
            .locations
            .iter()
            .filter(|entry| !dropped.contains(&entry.id))
            .map(|entry| Self::record(entry.id, entry.lat, entry.lng, entry.altitude, entry.timestamp))
            .collect();
        for id in self.extra.lock().unwrap().iter() {
            locations.push(Self::record(*id, 0.0, 0.0, None, Utc::now()));
        }

        Ok(SyncLocationsResponse {
            success: true,
            synced: locations.len(),
            rejected: request.locations.len().saturating_sub(locations.len()),
            locations,
        })
    }

    async fn list_locations(&self, _since: Option<DateTime<Utc>>) -> ApiResult<Vec<LocationRecord>> {
        self.check_auth()?;
        Ok(Vec::new())
    }

    async fn health(&self) -> ApiResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::Status {
                status: 503,
                message: "Service Unavailable".to_string(),
            })
        }
    }
}
