use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window limiter keyed by endpoint and user.
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    create_limit: u32,
    sync_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Clone, Copy)]
pub enum ProtectedEndpoint {
    LocationCreate,
    LocationSync,
}

#[derive(Default)]
struct RateLimitMetrics {
    create_allowed: AtomicU64,
    create_limited: AtomicU64,
    sync_allowed: AtomicU64,
    sync_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitMetricsSnapshot {
    pub create_allowed: u64,
    pub create_limited: u64,
    pub sync_allowed: u64,
    pub sync_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.create_rate_limit_per_window,
            config.sync_rate_limit_per_window,
        )
    }

    fn new(window: Duration, create_limit: u32, sync_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            create_limit,
            sync_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::LocationCreate => self.create_limit,
            ProtectedEndpoint::LocationSync => self.sync_limit,
        };

        let key = format!("{}:{user_id}", endpoint.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;

        // Drop windows that ended so idle users do not accumulate
        let window = self.window;
        guard.retain(|_, entry| now.duration_since(entry.started_at) < window);

        let entry = guard.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs();
            self.mark(endpoint, false);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                "Rate limit exceeded, retry later",
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.mark(endpoint, true);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            create_allowed: self.metrics.create_allowed.load(Ordering::Relaxed),
            create_limited: self.metrics.create_limited.load(Ordering::Relaxed),
            sync_allowed: self.metrics.sync_allowed.load(Ordering::Relaxed),
            sync_limited: self.metrics.sync_limited.load(Ordering::Relaxed),
        }
    }

    fn mark(&self, endpoint: ProtectedEndpoint, allowed: bool) {
        let counter = match (endpoint, allowed) {
            (ProtectedEndpoint::LocationCreate, true) => &self.metrics.create_allowed,
            (ProtectedEndpoint::LocationCreate, false) => &self.metrics.create_limited,
            (ProtectedEndpoint::LocationSync, true) => &self.metrics.sync_allowed,
            (ProtectedEndpoint::LocationSync, false) => &self.metrics.sync_limited,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::LocationCreate => "location_create",
            Self::LocationSync => "location_sync",
        }
    }
}

/// Stable, non-reversible user tag for logs.
pub fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}
