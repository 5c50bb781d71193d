//! HTTP routing for the Venue API.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Terminal routes (Bearer device credential):                            │
//! │    POST /api/sync/batch           submit queued sales                   │
//! │    POST /api/heartbeat            liveness ping (204)                   │
//! │    GET  /api/device/config        config snapshot                       │
//! │                                                                         │
//! │  Pairing routes (unauthenticated by design):                            │
//! │    GET  /api/pairing/claim        ?token= or ?code=                     │
//! │    POST /api/auth/device/login    device id + PIN                       │
//! │                                                                         │
//! │  Admin routes (Bearer admin token):                                     │
//! │    POST /api/pairing/token        issue pairing token                   │
//! │    POST /api/admin/devices        register device                       │
//! │    GET  /api/admin/devices        list devices                          │
//! │    GET  /api/admin/devices/{id}   get device                            │
//! │    PUT  /api/admin/devices/{id}   update device                         │
//! │    DELETE /api/admin/devices/{id}  revoke (alias)                       │
//! │    POST /api/admin/devices/{id}/revoke                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Revocation is enforced here: every authenticated request reloads the
//! device row and rejects when `is_active` is false, so a revoked terminal
//! loses access on its very next call even with an unexpired JWT.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use atrio_core::types::DeviceSnapshot;

use crate::auth::{extract_bearer_token, JwtManager};
use crate::db::DeviceRecord;
use crate::error::VenueError;
use crate::services::device::{
    CreateDeviceRequest, DeviceConfigSnapshot, DeviceLoginRequest, DeviceLoginResponse,
    UpdateDeviceRequest,
};
use crate::services::pairing::{ClaimGrant, IssueTokenRequest, PairingTicket};
use crate::services::sync::{SyncBatchRequest, SyncBatchResponse};
use crate::services::{DeviceService, PairingService, SyncService};
use crate::AppState;

/// Everything the handlers need, cloned per request.
#[derive(Clone)]
pub struct ApiContext {
    state: Arc<AppState>,
    jwt: Arc<JwtManager>,
    pairing: Arc<PairingService>,
    sync: Arc<SyncService>,
    devices: Arc<DeviceService>,
}

/// Build the full router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let context = ApiContext {
        jwt: Arc::new(JwtManager::new(
            state.config.jwt_secret.clone(),
            state.config.jwt_device_lifetime_secs,
        )),
        pairing: Arc::new(PairingService::new(state.clone())),
        sync: Arc::new(SyncService::new(state.clone())),
        devices: Arc::new(DeviceService::new(state.clone())),
        state,
    };

    Router::new()
        // Terminal
        .route("/api/sync/batch", post(submit_batch))
        .route("/api/heartbeat", post(heartbeat))
        .route("/api/device/config", get(device_config))
        // Pairing
        .route("/api/pairing/claim", get(claim_pairing))
        .route("/api/auth/device/login", post(device_login))
        // Admin
        .route("/api/pairing/token", post(issue_pairing_token))
        .route("/api/admin/devices", post(create_device).get(list_devices))
        .route(
            "/api/admin/devices/{id}",
            get(get_device).put(update_device).delete(delete_device),
        )
        .route("/api/admin/devices/{id}/revoke", post(revoke_device))
        .with_state(context)
}

// =============================================================================
// Authentication Helpers
// =============================================================================

/// Validate the Bearer device credential and reload the device row.
async fn authenticate_device(
    context: &ApiContext,
    headers: &HeaderMap,
) -> Result<DeviceRecord, VenueError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| VenueError::AuthFailed("Missing authorization header".to_string()))?;

    let token = extract_bearer_token(auth_header)
        .ok_or_else(|| VenueError::AuthFailed("Invalid authorization header".to_string()))?;

    let claims = context.jwt.validate_device_token(token)?;

    let device = context
        .state
        .db
        .get_device(&claims.sub)
        .await?
        .ok_or_else(|| VenueError::AuthFailed("Unknown device".to_string()))?;

    if !device.is_active {
        return Err(VenueError::Unauthorized("Device is revoked".to_string()));
    }

    Ok(device)
}

/// Check the shared admin token.
fn require_admin(context: &ApiContext, headers: &HeaderMap) -> Result<(), VenueError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| VenueError::AuthFailed("Missing authorization header".to_string()))?;

    let token = extract_bearer_token(auth_header)
        .ok_or_else(|| VenueError::AuthFailed("Invalid authorization header".to_string()))?;

    if token != context.state.config.admin_token {
        return Err(VenueError::Unauthorized("Admin token required".to_string()));
    }

    Ok(())
}

// =============================================================================
// Terminal Handlers
// =============================================================================

async fn submit_batch(
    State(context): State<ApiContext>,
    headers: HeaderMap,
    Json(request): Json<SyncBatchRequest>,
) -> Result<Json<SyncBatchResponse>, VenueError> {
    let device = authenticate_device(&context, &headers).await?;
    let response = context.sync.submit_batch(&device.id, &request).await?;
    Ok(Json(response))
}

async fn heartbeat(
    State(context): State<ApiContext>,
    headers: HeaderMap,
) -> Result<StatusCode, VenueError> {
    let device = authenticate_device(&context, &headers).await?;
    context.sync.heartbeat(&device.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn device_config(
    State(context): State<ApiContext>,
    headers: HeaderMap,
) -> Result<Json<DeviceConfigSnapshot>, VenueError> {
    let device = authenticate_device(&context, &headers).await?;
    let snapshot = context.devices.config_snapshot(&device.id).await?;
    Ok(Json(snapshot))
}

// =============================================================================
// Pairing Handlers
// =============================================================================

#[derive(Debug, Deserialize)]
struct ClaimParams {
    token: Option<String>,
    code: Option<String>,
}

async fn claim_pairing(
    State(context): State<ApiContext>,
    Query(params): Query<ClaimParams>,
) -> Result<Json<ClaimGrant>, VenueError> {
    let grant = match (params.token, params.code) {
        (Some(token), _) => context.pairing.claim_by_token(&token).await?,
        (None, Some(code)) => context.pairing.claim_by_code(&code).await?,
        (None, None) => {
            return Err(VenueError::InvalidRequest(
                "Provide either token or code".to_string(),
            ))
        }
    };
    Ok(Json(grant))
}

async fn device_login(
    State(context): State<ApiContext>,
    Json(request): Json<DeviceLoginRequest>,
) -> Result<Json<DeviceLoginResponse>, VenueError> {
    let response = context.devices.login_with_pin(&request).await?;
    Ok(Json(response))
}

// =============================================================================
// Admin Handlers
// =============================================================================

async fn issue_pairing_token(
    State(context): State<ApiContext>,
    headers: HeaderMap,
    Json(request): Json<IssueTokenRequest>,
) -> Result<Json<PairingTicket>, VenueError> {
    require_admin(&context, &headers)?;
    let ticket = context.pairing.issue_token(&request.device_id).await?;
    Ok(Json(ticket))
}

async fn create_device(
    State(context): State<ApiContext>,
    headers: HeaderMap,
    Json(request): Json<CreateDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceSnapshot>), VenueError> {
    require_admin(&context, &headers)?;
    let device = context.devices.create_device(request).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

async fn list_devices(
    State(context): State<ApiContext>,
    headers: HeaderMap,
) -> Result<Json<Vec<DeviceSnapshot>>, VenueError> {
    require_admin(&context, &headers)?;
    Ok(Json(context.devices.list_devices().await?))
}

async fn get_device(
    State(context): State<ApiContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DeviceSnapshot>, VenueError> {
    require_admin(&context, &headers)?;
    Ok(Json(context.devices.get_device(&id).await?))
}

async fn update_device(
    State(context): State<ApiContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateDeviceRequest>,
) -> Result<Json<DeviceSnapshot>, VenueError> {
    require_admin(&context, &headers)?;
    Ok(Json(context.devices.update_device(&id, request).await?))
}

/// DELETE is revocation, not row removal: the ledger and audit trail keep
/// referencing the device.
async fn delete_device(
    State(context): State<ApiContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, VenueError> {
    require_admin(&context, &headers)?;
    context.devices.revoke_device(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_device(
    State(context): State<ApiContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, VenueError> {
    require_admin(&context, &headers)?;
    context.devices.revoke_device(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
