use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use geolog_core::models::{
    validate_coordinates, CreateLocationRequest, LocationRecord, SyncLocationInput,
    SyncLocationsResponse,
};
use geolog_core::util::now_millis;
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{
    extract_bearer_token, hash_password, normalize_email, validate_password, verify_password,
    AuthenticatedUser, JwtKeys,
};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{
    user_fingerprint, EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot,
};
use crate::store::LocationStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: LocationStore,
    jwt: Arc<JwtKeys>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: LocationStore) -> Self {
        Self {
            jwt: Arc::new(JwtKeys::from_config(&config)),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            store,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/location", post(create_location).get(list_locations))
        .route("/location/sync", post(sync_locations))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api_routes = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .merge(protected_routes);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_headers(Any)
        .allow_methods(Any)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt.verify(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct CredentialsRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
struct UserResponse {
    id: String,
    email: String,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    token: String,
    user: UserResponse,
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let Json(request) = payload?;
    let email = normalize_email(&request.email)?;
    validate_password(&request.password)?;

    let password_hash = hash_password(request.password).await?;
    let user = state.store.create_user(&email, &password_hash).await?;
    let token = state.jwt.issue(&user.id, &user.email)?;

    tracing::info!(user = user_fingerprint(&user.id), "Registered account");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: UserResponse {
                id: user.id,
                email: user.email,
            },
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(request) = payload?;
    let email = normalize_email(&request.email)?;
    if request.password.is_empty() {
        return Err(AppError::bad_request("Password is required"));
    }

    let invalid = || AppError::unauthorized("Invalid credentials");
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(request.password, user.password_hash).await {
        tracing::info!(user = user_fingerprint(&user.id), "Login rejected");
        return Err(invalid());
    }

    let token = state.jwt.issue(&user.id, &user.email)?;
    Ok(Json(AuthResponse {
        token,
        user: UserResponse {
            id: user.id,
            email: user.email,
        },
    }))
}

async fn create_location(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<CreateLocationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<LocationRecord>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::LocationCreate, &user.user_id)
        .await?;

    let Json(request) = payload?;
    validate_coordinates(request.lat, request.lng, request.altitude)
        .map_err(|error| AppError::bad_request(error.to_string()))?;

    let entry = SyncLocationInput {
        id: request.id.unwrap_or_default(),
        lat: request.lat,
        lng: request.lng,
        altitude: request.altitude,
        timestamp: request.timestamp.unwrap_or_else(now_millis),
    };
    let record = state
        .store
        .upsert_locations(&user.user_id, &[entry])
        .await?
        .pop()
        .ok_or_else(|| AppError::internal("stored location was not returned"))?;

    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    since: Option<DateTime<Utc>>,
}

async fn list_locations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<LocationRecord>>, AppError> {
    let Query(query) = query?;
    let locations = state
        .store
        .list_locations(&user.user_id, query.since)
        .await?;
    Ok(Json(locations))
}

/// Entries stay loosely typed so one bad entry is skipped instead of failing the batch.
#[derive(Debug, Deserialize)]
struct SyncBody {
    locations: Option<Value>,
}

async fn sync_locations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<SyncBody>, JsonRejection>,
) -> Result<Json<SyncLocationsResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::LocationSync, &user.user_id)
        .await?;

    let Json(body) = payload?;
    let Some(Value::Array(raw_entries)) = body.locations else {
        return Err(AppError::bad_request("Locations must be an array"));
    };

    let (accepted, rejected) = partition_entries(raw_entries);
    let locations = state
        .store
        .upsert_locations(&user.user_id, &accepted)
        .await?;

    tracing::info!(
        endpoint = ProtectedEndpoint::LocationSync.label(),
        user = user_fingerprint(&user.user_id),
        received = accepted.len() + rejected,
        synced = locations.len(),
        rejected,
        "Ingested location batch"
    );
    Ok(Json(SyncLocationsResponse {
        success: true,
        synced: locations.len(),
        locations,
        rejected,
    }))
}

/// Split raw batch entries into valid inputs and a count of skipped ones.
fn partition_entries(raw_entries: Vec<Value>) -> (Vec<SyncLocationInput>, usize) {
    let mut accepted = Vec::with_capacity(raw_entries.len());
    let mut rejected = 0;
    for raw in raw_entries {
        match serde_json::from_value::<SyncLocationInput>(raw) {
            Ok(entry) if validate_coordinates(entry.lat, entry.lng, entry.altitude).is_ok() => {
                accepted.push(entry);
            }
            Ok(entry) => {
                tracing::debug!(id = %entry.id, "Skipping entry with invalid coordinates");
                rejected += 1;
            }
            Err(error) => {
                tracing::debug!("Skipping malformed entry: {}", error);
                rejected += 1;
            }
        }
    }
    (accepted, rejected)
}
