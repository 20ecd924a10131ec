//! Tourist API Routes
//!
//! Self-service profile and location endpoints under `/tourists/me`, plus the
//! responder views of every tourist.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use geofence::GeoPoint;
use safety_store::{
    AlertKind, Geofence, LocationFix, LocationPing, ProfileUpdate, Role, User, UserProfile,
    ZoneKind,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::alerts::{raise_alert, AlertRequest};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiJson, ApiQuery, ApiResult};
use crate::realtime::DashboardEvent;
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1000;

// ========== Request/Response Types ==========

#[derive(Deserialize)]
pub struct PushTokenRequest {
    pub push_token: Option<String>,
}

#[derive(Deserialize)]
pub struct LocationRequest {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: Option<f64>,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ZoneSummary {
    pub id: Uuid,
    pub name: String,
    pub kind: ZoneKind,
}

impl From<&Geofence> for ZoneSummary {
    fn from(g: &Geofence) -> Self {
        Self {
            id: g.id,
            name: g.name.clone(),
            kind: g.kind,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NearbyWarning {
    pub id: Uuid,
    pub name: String,
    pub kind: ZoneKind,
    pub distance_m: f64,
}

#[derive(Debug, Serialize)]
pub struct LocationUpdateResponse {
    pub ping: LocationPing,
    pub zones: Vec<ZoneSummary>,
    pub max_risk: Option<ZoneKind>,
    pub risk_level: u8,
    pub breach_alert_ids: Vec<Uuid>,
    /// Restricted or danger zones close by but not yet entered
    pub nearby_warnings: Vec<NearbyWarning>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub user_id: Uuid,
    pub count: usize,
    pub pings: Vec<LocationPing>,
}

#[derive(Serialize)]
pub struct TouristListResponse {
    pub count: usize,
    pub tourists: Vec<UserProfile>,
}

pub fn tourist_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tourists))
        .route("/me", get(get_me).put(update_me))
        .route("/me/push-token", put(set_push_token))
        .route("/me/location", post(update_location))
        .route("/me/location/history", get(my_history))
        .route("/:id", get(get_tourist))
        .route("/:id/location/history", get(tourist_history))
}

pub async fn load_user(state: &AppState, id: Uuid) -> ApiResult<User> {
    state
        .store
        .user(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))
}

async fn get_me(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<UserProfile>> {
    Ok(Json(load_user(&state, auth.id).await?.profile()))
}

async fn update_me(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> ApiResult<Json<UserProfile>> {
    if matches!(&update.name, Some(name) if name.trim().is_empty()) {
        return Err(ApiError::BadRequest("Name cannot be empty".into()));
    }
    let user = state.store.update_user_profile(auth.id, update).await?;
    Ok(Json(user.profile()))
}

async fn set_push_token(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<PushTokenRequest>,
) -> ApiResult<StatusCode> {
    let token = req.push_token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    state.store.set_push_token(auth.id, token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn zones_at(state: &AppState, point: Option<GeoPoint>) -> ApiResult<Vec<Geofence>> {
    match point {
        Some(p) => Ok(state.store.geofences_containing(p).await?),
        None => Ok(Vec::new()),
    }
}

/// Record a fix, raise breach alerts for newly entered restricted or danger
/// zones, and tell the dashboards.
async fn update_location(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<LocationRequest>,
) -> ApiResult<Json<LocationUpdateResponse>> {
    auth.require_role(&[Role::Tourist])?;

    let point = GeoPoint::checked(req.lat, req.lng)?;
    if let Some(accuracy) = req.accuracy_m {
        if !accuracy.is_finite() || accuracy < 0.0 {
            return Err(ApiError::BadRequest("accuracy_m must be non-negative".into()));
        }
    }

    // one update per tourist at a time, so two fixes cannot both see "outside"
    let _guard = state.lock_tourist(auth.id).await;
    let user = load_user(&state, auth.id).await?;
    let previous: HashSet<Uuid> = zones_at(&state, user.last_location.map(|f| f.point))
        .await?
        .into_iter()
        .map(|g| g.id)
        .collect();

    let fix = LocationFix {
        point,
        accuracy_m: req.accuracy_m,
        recorded_at: req.recorded_at.unwrap_or_else(Utc::now),
    };
    let ping = state.store.record_location(user.id, fix).await?;
    let zones = zones_at(&state, Some(point)).await?;

    let mut breach_alert_ids = Vec::new();
    for zone in zones
        .iter()
        .filter(|z| z.kind.raises_breach() && !previous.contains(&z.id))
    {
        let request = AlertRequest {
            kind: AlertKind::GeofenceBreach,
            location: Some(point),
            message: Some(format!("Entered {} zone '{}'", zone.kind.as_str(), zone.name)),
        };
        let alert = raise_alert(&state, &user, request).await?;
        breach_alert_ids.push(alert.id);
    }

    let max_risk = zones.iter().map(|z| z.kind).max();
    let geofence_ids: Vec<Uuid> = zones.iter().map(|z| z.id).collect();

    state.hub.publish(DashboardEvent::LocationUpdated {
        user_id: user.id,
        point,
        recorded_at: fix.recorded_at,
        geofence_ids: geofence_ids.clone(),
        max_risk,
    });

    let nearby_warnings = match state
        .store
        .geofences_near(point, state.config.alert_nearby_radius_m)
        .await
    {
        Ok(near) => near
            .into_iter()
            .filter(|n| n.geofence.kind.raises_breach() && !geofence_ids.contains(&n.geofence.id))
            .map(|n| NearbyWarning {
                id: n.geofence.id,
                name: n.geofence.name,
                kind: n.geofence.kind,
                distance_m: n.distance_m,
            })
            .collect(),
        Err(e) => {
            warn!("Nearby zone lookup failed for {}: {}", user.id, e);
            Vec::new()
        }
    };

    debug!(
        "Location for {}: {} zones, {} breaches",
        user.id,
        zones.len(),
        breach_alert_ids.len()
    );

    Ok(Json(LocationUpdateResponse {
        ping,
        zones: zones.iter().map(ZoneSummary::from).collect(),
        max_risk,
        risk_level: max_risk.map_or(0, |k| k.risk_level()),
        breach_alert_ids,
        nearby_warnings,
    }))
}

async fn history(state: &AppState, user_id: Uuid, query: HistoryQuery) -> ApiResult<HistoryResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let pings = state
        .store
        .location_history(user_id, query.since, limit)
        .await?;

    Ok(HistoryResponse {
        user_id,
        count: pings.len(),
        pings,
    })
}

async fn my_history(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    Ok(Json(history(&state, auth.id, query).await?))
}

async fn list_tourists(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<TouristListResponse>> {
    auth.require_responder()?;
    let tourists: Vec<UserProfile> = state
        .store
        .list_users(Some(Role::Tourist))
        .await?
        .iter()
        .map(User::profile)
        .collect();

    Ok(Json(TouristListResponse {
        count: tourists.len(),
        tourists,
    }))
}

async fn get_tourist(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<UserProfile>> {
    auth.require_responder()?;
    Ok(Json(load_tourist(&state, id).await?.profile()))
}

/// Staff accounts are not visible through the tourist routes
async fn load_tourist(state: &AppState, id: Uuid) -> ApiResult<User> {
    let user = load_user(state, id).await?;
    if user.role != Role::Tourist {
        return Err(ApiError::NotFound(format!("tourist {id} not found")));
    }
    Ok(user)
}

async fn tourist_history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    auth.require_responder()?;
    load_tourist(&state, id).await?;
    Ok(Json(history(&state, id, query).await?))
}
