//! Account registration and sign-in against the Geologger backend.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{normalize_base_url, parse_api_error};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

/// A signed-in user and the bearer token the backend issued.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: AuthUser,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(String),
    #[error("{0}")]
    InvalidCredentials(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Where the signed-in session is kept between runs.
pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

#[derive(Serialize)]
struct CredentialsRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Clone)]
pub struct AuthClient<S: SessionPersistence> {
    base_url: String,
    client: Client,
    store: S,
}

impl<S: SessionPersistence> AuthClient<S> {
    pub fn new(base_url: impl AsRef<str>, timeout: Duration, store: S) -> AuthResult<Self> {
        let base_url = normalize_base_url(base_url.as_ref())
            .map_err(|error| AuthError::InvalidConfiguration(error.to_string()))?;
        Ok(Self {
            base_url,
            client: Client::builder().timeout(timeout).build()?,
            store,
        })
    }

    /// The persisted session, if any.
    pub fn current_session(&self) -> AuthResult<Option<AuthSession>> {
        self.store.load_session()
    }

    pub async fn register(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidCredentials(
                "Password must be at least 8 characters",
            ));
        }
        self.authenticate("register", email, password).await
    }

    pub async fn login(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;
        self.authenticate("login", email, password).await
    }

    /// Forget the local session. Tokens are stateless, so the server is not contacted.
    pub fn logout(&self) -> AuthResult<()> {
        self.store.clear_session()
    }

    async fn authenticate(&self, action: &str, email: &str, password: &str) -> AuthResult<AuthSession> {
        let response = self
            .client
            .post(format!("{}/api/auth/{action}", self.base_url))
            .header("Accept", "application/json")
            .json(&CredentialsRequest {
                email: email.trim(),
                password,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::Api(describe_failure(status, &body)));
        }

        let session: AuthSession = serde_json::from_str(&body)?;
        if session.token.trim().is_empty() {
            return Err(AuthError::Api(
                "Auth response did not include a token".to_string(),
            ));
        }

        self.store.save_session(&session)?;
        tracing::info!(user = %session.user.id, "Signed in");
        Ok(session)
    }
}

fn describe_failure(status: StatusCode, body: &str) -> String {
    format!("{} ({})", parse_api_error(status, body), status.as_u16())
}

fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    let email = email.trim();
    if email.is_empty() {
        return Err(AuthError::InvalidCredentials("Email is required"));
    }
    if !email.contains('@') {
        return Err(AuthError::InvalidCredentials("Email address is not valid"));
    }
    if password.trim().is_empty() {
        return Err(AuthError::InvalidCredentials("Password is required"));
    }
    Ok(())
}
