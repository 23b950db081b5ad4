use std::time::Duration;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// HS256 signing and verification of bearer tokens.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    clock_skew: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    exp: i64,
    iat: Option<i64>,
    nbf: Option<i64>,
}

impl JwtKeys {
    pub fn from_config(config: &AppConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: config.jwt_ttl,
            clock_skew: config.auth_clock_skew,
        }
    }

    pub fn issue(&self, user_id: &str, email: &str) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            exp: now.saturating_add(ttl),
            iat: Some(now),
            nbf: None,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|error| AppError::internal(format!("Token signing failed: {}", sanitize(&error))))
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.clock_skew.as_secs();
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let decoded = decode::<Claims>(token, &self.decoding, &validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;

        if decoded.claims.sub.trim().is_empty() {
            return Err(AppError::unauthorized("Token subject is missing"));
        }
        validate_temporal_claims(&decoded.claims, self.clock_skew)?;

        Ok(AuthenticatedUser {
            user_id: decoded.claims.sub,
        })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

fn validate_temporal_claims(claims: &Claims, clock_skew: Duration) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    if claims.exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    let iat = claims
        .iat
        .ok_or_else(|| AppError::unauthorized("Token missing `iat` claim"))?;
    if iat > now.saturating_add(skew) {
        return Err(AppError::unauthorized("Token `iat` is in the future"));
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token is not yet valid"));
        }
    }

    Ok(())
}

/// Trimmed, lowercased email, or a 400 describing what is wrong with it.
pub fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(AppError::bad_request("Valid email is required"));
    }

    let well_formed = !email.chars().any(char::is_whitespace)
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .rsplit_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        });
    if !well_formed {
        return Err(AppError::bad_request("Invalid email format"));
    }

    Ok(email.to_lowercase())
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.trim().is_empty() {
        return Err(AppError::bad_request("Password is required"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }
    Ok(())
}

/// Argon2id hash in PHC string form. CPU bound, so it runs off the async workers.
pub async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
            .map_err(|error| AppError::internal(format!("Salt encoding failed: {error}")))?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|error| AppError::internal(format!("Password hashing failed: {error}")))
    })
    .await
    .map_err(|error| AppError::internal(format!("Password hashing task failed: {error}")))?
}

/// False for a wrong password or an unreadable stored hash.
pub async fn verify_password(password: String, stored_hash: String) -> bool {
    tokio::task::spawn_blocking(move || {
        PasswordHash::new(&stored_hash).is_ok_and(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    })
    .await
    .unwrap_or(false)
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::config::test_config;

    #[test]
    fn bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );

        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn issued_token_verifies_and_carries_subject() {
        let keys = JwtKeys::from_config(&test_config());
        let token = keys.issue("user-1", "user@example.com").unwrap();

        let user = keys.verify(&token).unwrap();
        assert_eq!(user.user_id, "user-1");
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let keys = JwtKeys::from_config(&test_config());
        let mut other_config = test_config();
        other_config.jwt_secret = "another-secret-that-is-at-least-32-bytes".to_string();
        let foreign = JwtKeys::from_config(&other_config)
            .issue("user-1", "user@example.com")
            .unwrap();

        assert!(matches!(keys.verify(&foreign), Err(AppError::Unauthorized(_))));
        assert!(keys.verify("not-a-jwt").is_err());
    }

    #[test]
    fn temporal_claims_reject_expired_token() {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "user".to_string(),
            email: "user@example.com".to_string(),
            exp: now - 600,
            iat: Some(now - 1200),
            nbf: None,
        };
        let err = validate_temporal_claims(&claims, Duration::from_secs(60)).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn temporal_claims_reject_future_iat() {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "user".to_string(),
            email: "user@example.com".to_string(),
            exp: now + 300,
            iat: Some(now + 120),
            nbf: None,
        };
        let err = validate_temporal_claims(&claims, Duration::from_secs(30)).unwrap_err();
        assert!(err.to_string().contains("future"));
    }

    #[test]
    fn email_is_normalized_and_checked() {
        assert_eq!(
            normalize_email("  User@Example.COM ").unwrap(),
            "user@example.com"
        );
        assert!(normalize_email("").is_err());
        assert!(normalize_email("user@localhost").is_err());
        assert!(normalize_email("a b@example.com").is_err());
        assert!(normalize_email("a@b@example.com").is_err());
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("   ").is_err());
        assert!(validate_password("short").is_err());
        assert!(validate_password("long-enough").is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn password_hash_round_trip() {
        let hash = hash_password("correct horse".to_string()).await.unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse".to_string(), hash.clone()).await);
        assert!(!verify_password("wrong horse".to_string(), hash).await);
        assert!(!verify_password("anything".to_string(), "garbage".to_string()).await);
    }
}
