//! Client runtime configuration.
//!
//! `ClientConfig` is built once at startup, from the environment or an
//! explicit lookup, and handed to every component that needs it. Nothing in
//! this crate reads configuration from ambient global state.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::map::MapProvider;
use crate::sampler::SamplerConfig;
use crate::sync::BackoffPolicy;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_API_URL: &str = "http://localhost:4000";
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_SYNC_ATTEMPTS: u32 = 10;

/// Configuration shared by the client pipeline components.
#[derive(Clone, PartialEq)]
pub struct ClientConfig {
    /// Backend base URL, without trailing slash
    pub api_base_url: String,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// Sampler throttling settings
    pub sampler: SamplerConfig,
    /// Periodic reconciliation while online; `None` disables the timer
    pub sync_interval: Option<Duration>,
    /// Failed delivery attempts before a sample is dead-lettered
    pub max_sync_attempts: u32,
    /// Retry delays after failed reconciliation passes
    pub backoff: BackoffPolicy,
    /// Map provider used for route rendering
    pub map_provider: MapProvider,
    /// API key for providers that require one
    pub google_maps_api_key: Option<String>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("http_timeout", &self.http_timeout)
            .field("sampler", &self.sampler)
            .field("sync_interval", &self.sync_interval)
            .field("max_sync_attempts", &self.max_sync_attempts)
            .field("backoff", &self.backoff)
            .field("map_provider", &self.map_provider)
            .field(
                "google_maps_api_key",
                &self.google_maps_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
            sampler: SamplerConfig::default(),
            sync_interval: None,
            max_sync_attempts: DEFAULT_MAX_SYNC_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            map_provider: MapProvider::default(),
            google_maps_api_key: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let api_base_url = lookup_trimmed(&lookup, "GEOLOG_API_URL")
            .unwrap_or(defaults.api_base_url)
            .trim_end_matches('/')
            .to_string();
        if !is_http_url(&api_base_url) {
            return Err(Error::Config(
                "GEOLOG_API_URL must start with http:// or https://".to_string(),
            ));
        }

        let http_timeout_ms = parse_u64(&lookup, "GEOLOG_HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT_MS)?;
        if !(1_000..=120_000).contains(&http_timeout_ms) {
            return Err(Error::Config(
                "GEOLOG_HTTP_TIMEOUT_MS must be in [1000, 120000]".to_string(),
            ));
        }

        let min_interval_ms = parse_u64(
            &lookup,
            "GEOLOG_MIN_INTERVAL_MS",
            duration_millis(defaults.sampler.min_interval),
        )?;
        let min_distance_m = lookup_trimmed(&lookup, "GEOLOG_MIN_DISTANCE_M")
            .map(|value| {
                value.parse::<f64>().map_err(|_| {
                    Error::Config("GEOLOG_MIN_DISTANCE_M must be a number".to_string())
                })
            })
            .transpose()?
            .unwrap_or(defaults.sampler.min_distance_m);
        if !min_distance_m.is_finite() || min_distance_m < 0.0 {
            return Err(Error::Config(
                "GEOLOG_MIN_DISTANCE_M must be a non-negative number".to_string(),
            ));
        }

        let sync_interval = match parse_u64(&lookup, "GEOLOG_SYNC_INTERVAL_SECS", 0)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let max_sync_attempts = u32::try_from(parse_u64(
            &lookup,
            "GEOLOG_MAX_SYNC_ATTEMPTS",
            u64::from(DEFAULT_MAX_SYNC_ATTEMPTS),
        )?)
        .ok()
        .filter(|value| (1..=1_000).contains(value))
        .ok_or_else(|| {
            Error::Config("GEOLOG_MAX_SYNC_ATTEMPTS must be in [1, 1000]".to_string())
        })?;

        let map_provider = lookup_trimmed(&lookup, "GEOLOG_MAP_PROVIDER")
            .map(|value| value.parse::<MapProvider>())
            .transpose()?
            .unwrap_or_default();
        let google_maps_api_key = lookup_trimmed(&lookup, "GEOLOG_GOOGLE_MAPS_API_KEY");

        Ok(Self {
            api_base_url,
            http_timeout: Duration::from_millis(http_timeout_ms),
            sampler: SamplerConfig {
                min_interval: Duration::from_millis(min_interval_ms),
                min_distance_m,
                ..defaults.sampler
            },
            sync_interval,
            max_sync_attempts,
            backoff: defaults.backoff,
            map_provider,
            google_maps_api_key,
        })
    }
}

/// Look-back windows for route queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimePeriod {
    #[default]
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "3hours")]
    ThreeHours,
    #[serde(rename = "9hours")]
    NineHours,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "all")]
    All,
}

impl TimePeriod {
    pub const fn label(self) -> &'static str {
        match self {
            Self::FifteenMinutes => "15min",
            Self::OneHour => "1hour",
            Self::ThreeHours => "3hours",
            Self::NineHours => "9hours",
            Self::Day => "day",
            Self::All => "all",
        }
    }

    const fn span_minutes(self) -> Option<i64> {
        match self {
            Self::FifteenMinutes => Some(15),
            Self::OneHour => Some(60),
            Self::ThreeHours => Some(3 * 60),
            Self::NineHours => Some(9 * 60),
            Self::Day => Some(24 * 60),
            Self::All => None,
        }
    }

    /// Start of the window ending at `now`; `None` for the unbounded period.
    pub fn start(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.span_minutes()
            .map(|minutes| now - chrono::Duration::minutes(minutes))
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TimePeriod {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "15min" => Ok(Self::FifteenMinutes),
            "1hour" => Ok(Self::OneHour),
            "3hours" => Ok(Self::ThreeHours),
            "9hours" => Ok(Self::NineHours),
            "day" => Ok(Self::Day),
            "all" => Ok(Self::All),
            other => Err(Error::InvalidInput(format!(
                "unknown time period `{other}` (expected 15min, 1hour, 3hours, 9hours, day, all)"
            ))),
        }
    }
}

fn lookup_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

fn parse_u64(lookup: impl Fn(&str) -> Option<String>, name: &str, default: u64) -> Result<u64> {
    lookup_trimmed(lookup, name).map_or(Ok(default), |value| {
        value
            .parse::<u64>()
            .map_err(|_| Error::Config(format!("{name} must be a non-negative integer")))
    })
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
