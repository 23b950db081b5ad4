//! Client for the Geologger backend location endpoints.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{
    CreateLocationRequest, LocationRecord, SyncLocationsRequest, SyncLocationsResponse,
};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not signed in; run `geolog auth login` first")]
    Unauthenticated,
    #[error("Invalid API configuration: {0}")]
    InvalidConfiguration(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server error: {message} ({status})")]
    Status { status: u16, message: String },
    #[error("Invalid response payload: {0}")]
    InvalidPayload(String),
}

impl ApiError {
    /// True when the server refused the bearer token.
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Status { status: 401, .. })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Backend operations used by the sync pipeline.
///
/// The pipeline only talks to the server through this trait so tests can
/// substitute scripted implementations.
pub trait LocationApi: Send + Sync {
    /// `POST /api/location`
    fn create_location(
        &self,
        request: &CreateLocationRequest,
    ) -> impl Future<Output = ApiResult<LocationRecord>> + Send;

    /// `POST /api/location/sync`
    fn sync_locations(
        &self,
        request: &SyncLocationsRequest,
    ) -> impl Future<Output = ApiResult<SyncLocationsResponse>> + Send;

    /// `GET /api/location`, newest first
    fn list_locations(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> impl Future<Output = ApiResult<Vec<LocationRecord>>> + Send;

    /// `GET /health`; succeeds when the server answered with a 2xx status
    fn health(&self) -> impl Future<Output = ApiResult<()>> + Send;
}

impl<A: LocationApi + ?Sized> LocationApi for Arc<A> {
    fn create_location(
        &self,
        request: &CreateLocationRequest,
    ) -> impl Future<Output = ApiResult<LocationRecord>> + Send {
        (**self).create_location(request)
    }

    fn sync_locations(
        &self,
        request: &SyncLocationsRequest,
    ) -> impl Future<Output = ApiResult<SyncLocationsResponse>> + Send {
        (**self).sync_locations(request)
    }

    fn list_locations(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> impl Future<Output = ApiResult<Vec<LocationRecord>>> + Send {
        (**self).list_locations(since)
    }

    fn health(&self) -> impl Future<Output = ApiResult<()>> + Send {
        (**self).health()
    }
}

/// reqwest-backed [`LocationApi`].
#[derive(Clone)]
pub struct HttpLocationApi {
    base_url: String,
    client: Client,
    token: Option<String>,
}

impl fmt::Debug for HttpLocationApi {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpLocationApi")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpLocationApi {
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.as_ref())?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            client,
            token: None,
        })
    }

    /// Attach the bearer token sent with protected requests.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = normalize_text_option(token);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> ApiResult<RequestBuilder> {
        let token = self.token.as_deref().ok_or(ApiError::Unauthenticated)?;
        Ok(request
            .bearer_auth(token)
            .header("Accept", "application/json"))
    }
}

impl LocationApi for HttpLocationApi {
    async fn create_location(&self, request: &CreateLocationRequest) -> ApiResult<LocationRecord> {
        let request = self.authorized(
            self.client
                .post(format!("{}/api/location", self.base_url))
                .json(request),
        )?;
        read_json(request.send().await?).await
    }

    async fn sync_locations(
        &self,
        request: &SyncLocationsRequest,
    ) -> ApiResult<SyncLocationsResponse> {
        let request = self.authorized(
            self.client
                .post(format!("{}/api/location/sync", self.base_url))
                .json(request),
        )?;
        read_json(request.send().await?).await
    }

    async fn list_locations(&self, since: Option<DateTime<Utc>>) -> ApiResult<Vec<LocationRecord>> {
        let mut request = self
            .client
            .get(format!("{}/api/location", self.base_url));
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Millis, true))]);
        }
        read_json(self.authorized(request)?.send().await?).await
    }

    async fn health(&self) -> ApiResult<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        ensure_success(response).await.map(drop)
    }
}

/// Trim a trailing slash and require an http(s) scheme.
pub fn normalize_base_url(url: &str) -> ApiResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ApiError::InvalidConfiguration(
            "API URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(trimmed) {
        return Err(ApiError::InvalidConfiguration(
            "API URL must include http:// or https://".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

pub(crate) async fn ensure_success(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message: parse_api_error(status, &body),
    })
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let response = ensure_success(response).await?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|error| {
        ApiError::InvalidPayload(format!("{error}: {}", compact_text(&body)))
    })
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
    message: Option<String>,
}

/// Extract a readable message from an error body.
pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorResponse>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            let message = message.trim();
            if !message.is_empty() {
                return message.to_string();
            }
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .map_or_else(|| format!("HTTP {}", status.as_u16()), ToString::to_string)
    } else {
        trimmed
    }
}
