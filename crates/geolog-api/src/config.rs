use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

const MIN_JWT_SECRET_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
    pub create_rate_limit_per_window: u32,
    /// Empty means any origin is allowed.
    pub cors_allowed_origins: Vec<String>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_ttl", &self.jwt_ttl)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_rate_limit_per_window",
                &self.sync_rate_limit_per_window,
            )
            .field(
                "create_rate_limit_per_window",
                &self.create_rate_limit_per_window,
            )
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "GEOLOG_API_BIND_ADDR", "127.0.0.1:4000");
        let database_path = value_or_default(&lookup, "GEOLOG_DATABASE_PATH", "geolog-api.db");

        let jwt_secret = required_trimmed(&lookup, "JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            return Err(ConfigError::Invalid(format!(
                "JWT_SECRET must be at least {MIN_JWT_SECRET_BYTES} bytes"
            )));
        }

        let jwt_ttl_secs = bounded_u64(&lookup, "JWT_TTL_SECS", "604800", 300..=2_592_000)?;
        let auth_clock_skew_secs = bounded_u64(&lookup, "AUTH_CLOCK_SKEW_SECS", "60", 0..=300)?;
        let rate_limit_window_secs =
            bounded_u64(&lookup, "RATE_LIMIT_WINDOW_SECS", "60", 10..=3_600)?;

        let sync_rate_limit_per_window =
            bounded_u32(&lookup, "SYNC_RATE_LIMIT_PER_WINDOW", "60", 1..=1_000)?;
        let create_rate_limit_per_window =
            bounded_u32(&lookup, "CREATE_RATE_LIMIT_PER_WINDOW", "600", 1..=10_000)?;

        let cors_allowed_origins = optional_trimmed(&lookup, "CORS_ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(|origin| trim_trailing(origin.trim()).to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if let Some(origin) = cors_allowed_origins
            .iter()
            .find(|origin| !is_http_url(origin))
        {
            return Err(ConfigError::Invalid(format!(
                "CORS_ALLOWED_ORIGINS entry `{origin}` must start with http:// or https://"
            )));
        }

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_ttl: Duration::from_secs(jwt_ttl_secs),
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window,
            create_rate_limit_per_window,
            cors_allowed_origins,
        })
    }
}

fn bounded_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = value_or_default(lookup, name, default)
        .parse::<u64>()
        .map_err(|_| invalid())?;
    if !range.contains(&value) {
        return Err(invalid());
    }
    Ok(value)
}

fn bounded_u32(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: std::ops::RangeInclusive<u32>,
) -> Result<u32, ConfigError> {
    let value = bounded_u64(
        lookup,
        name,
        default,
        u64::from(*range.start())..=u64::from(*range.end()),
    )?;
    u32::try_from(value).map_err(|_| ConfigError::Invalid(format!("{name} is out of range")))
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn trim_trailing(value: &str) -> &str {
    value.trim_end_matches('/')
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig::from_lookup(|key| {
        (key == "JWT_SECRET").then(|| "test-secret-that-is-at-least-32-bytes-long".to_string())
    })
    .unwrap()
}
