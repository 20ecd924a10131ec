//! Geofence API Routes
//!
//! Zones can be submitted as GeoJSON, as coordinate pairs, as a
//! `"lat,lng; ..."` string, or as a circle. Exactly one form per request.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use geofence::{
    parse_coordinate_pairs, parse_coordinate_string, CoordinateOrder, GeoPoint, Shape,
};
use safety_store::{Geofence, GeofenceUpdate, Role, ZoneKind};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiJson, ApiQuery, ApiResult};
use crate::realtime::{DashboardEvent, GeofenceAction};
use crate::state::AppState;
use crate::tourist_routes::ZoneSummary;

// ========== Request/Response Types ==========

#[derive(Debug, Deserialize)]
pub struct CircleInput {
    pub center: GeoPoint,
    pub radius_m: f64,
}

/// The accepted zone encodings
#[derive(Debug, Default, Deserialize)]
pub struct ShapeInput {
    pub geojson: Option<serde_json::Value>,
    pub coordinates: Option<Vec<[f64; 2]>>,
    #[serde(default)]
    pub order: CoordinateOrder,
    pub coordinate_string: Option<String>,
    pub circle: Option<CircleInput>,
}

impl ShapeInput {
    /// `Ok(None)` when no shape was given at all
    pub fn into_shape(self) -> ApiResult<Option<Shape>> {
        let given = [
            self.geojson.is_some(),
            self.coordinates.is_some(),
            self.coordinate_string.is_some(),
            self.circle.is_some(),
        ]
        .iter()
        .filter(|g| **g)
        .count();
        if given > 1 {
            return Err(ApiError::BadRequest(
                "Give exactly one of geojson, coordinates, coordinate_string or circle".into(),
            ));
        }

        let shape = if let Some(value) = self.geojson {
            Shape::from_geojson_value(&value)?
        } else if let Some(pairs) = self.coordinates {
            Shape::Polygon(parse_coordinate_pairs(&pairs, self.order)?)
        } else if let Some(text) = self.coordinate_string {
            Shape::Polygon(parse_coordinate_string(&text)?)
        } else if let Some(circle) = self.circle {
            Shape::circle(circle.center, circle.radius_m)?
        } else {
            return Ok(None);
        };
        Ok(Some(shape))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateGeofenceRequest {
    pub name: String,
    pub description: Option<String>,
    pub kind: ZoneKind,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(flatten)]
    pub shape: ShapeInput,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct UpdateGeofenceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<ZoneKind>,
    pub active: Option<bool>,
    #[serde(flatten)]
    pub shape: ShapeInput,
}

#[derive(Debug, Serialize)]
pub struct GeofenceView {
    #[serde(flatten)]
    pub geofence: Geofence,
    pub risk_level: u8,
    pub area_m2: f64,
    pub geojson: geojson::Geometry,
}

impl From<Geofence> for GeofenceView {
    fn from(geofence: Geofence) -> Self {
        Self {
            risk_level: geofence.kind.risk_level(),
            area_m2: geofence.shape.area_m2(),
            geojson: geofence.shape.to_geojson(),
            geofence,
        }
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub active: bool,
}

#[derive(Deserialize)]
pub struct CheckRequest {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Serialize)]
pub struct CheckResponse {
    pub point: GeoPoint,
    pub zones: Vec<ZoneSummary>,
    pub max_risk: Option<ZoneKind>,
    pub risk_level: u8,
    pub restricted: bool,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: Option<f64>,
}

#[derive(Serialize)]
pub struct NearbyZone {
    #[serde(flatten)]
    pub zone: GeofenceView,
    pub distance_m: f64,
}

#[derive(Serialize)]
pub struct NearbyResponse {
    pub point: GeoPoint,
    pub radius_m: f64,
    pub count: usize,
    pub zones: Vec<NearbyZone>,
}

pub fn geofence_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_geofences).post(create_geofence))
        .route("/check", post(check_point))
        .route("/nearby", get(nearby))
        .route(
            "/:id",
            get(get_geofence).put(update_geofence).delete(delete_geofence),
        )
}

async fn list_geofences(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Json<Vec<GeofenceView>>> {
    let fences = state.store.list_geofences(query.active).await?;
    Ok(Json(fences.into_iter().map(GeofenceView::from).collect()))
}

async fn create_geofence(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<CreateGeofenceRequest>,
) -> ApiResult<(StatusCode, Json<GeofenceView>)> {
    auth.require_responder()?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Name is required".into()));
    }
    let shape = req
        .shape
        .into_shape()?
        .ok_or_else(|| ApiError::BadRequest("A zone shape is required".into()))?;

    let mut fence = Geofence::new(name, req.kind, shape);
    fence.description = req.description;
    fence.active = req.active;
    fence.created_by = Some(auth.id);

    let fence = state.store.insert_geofence(fence).await?;
    info!("Geofence {} '{}' ({}) created by {}", fence.id, fence.name, fence.kind.as_str(), auth.id);
    state.hub.publish(DashboardEvent::GeofenceChanged {
        geofence_id: fence.id,
        action: GeofenceAction::Created,
    });

    Ok((StatusCode::CREATED, Json(fence.into())))
}

async fn get_geofence(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<GeofenceView>> {
    let fence = state
        .store
        .geofence(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("geofence {id} not found")))?;
    Ok(Json(fence.into()))
}

async fn update_geofence(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<UpdateGeofenceRequest>,
) -> ApiResult<Json<GeofenceView>> {
    auth.require_responder()?;
    if matches!(&req.name, Some(name) if name.trim().is_empty()) {
        return Err(ApiError::BadRequest("Name cannot be empty".into()));
    }

    let update = GeofenceUpdate {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description,
        kind: req.kind,
        shape: req.shape.into_shape()?,
        active: req.active,
    };
    let fence = state.store.update_geofence(id, update).await?;
    state.hub.publish(DashboardEvent::GeofenceChanged {
        geofence_id: id,
        action: GeofenceAction::Updated,
    });

    Ok(Json(fence.into()))
}

async fn delete_geofence(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    auth.require_role(&[Role::Admin])?;
    state.store.delete_geofence(id).await?;
    info!("Geofence {} deleted by {}", id, auth.id);
    state.hub.publish(DashboardEvent::GeofenceChanged {
        geofence_id: id,
        action: GeofenceAction::Deleted,
    });
    Ok(StatusCode::NO_CONTENT)
}

async fn check_point(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiJson(req): ApiJson<CheckRequest>,
) -> ApiResult<Json<CheckResponse>> {
    let point = GeoPoint::checked(req.lat, req.lng)?;
    let zones = state.store.geofences_containing(point).await?;
    let max_risk = zones.iter().map(|z| z.kind).max();

    Ok(Json(CheckResponse {
        point,
        restricted: zones.iter().any(|z| z.kind.raises_breach()),
        zones: zones.iter().map(ZoneSummary::from).collect(),
        risk_level: max_risk.map_or(0, |k| k.risk_level()),
        max_risk,
    }))
}

async fn nearby(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiQuery(query): ApiQuery<NearbyQuery>,
) -> ApiResult<Json<NearbyResponse>> {
    let point = GeoPoint::checked(query.lat, query.lng)?;
    let radius_m = query.radius_m.unwrap_or(state.config.alert_nearby_radius_m);
    if !radius_m.is_finite() || radius_m < 0.0 {
        return Err(ApiError::BadRequest(format!("Invalid radius {radius_m}")));
    }

    let zones: Vec<NearbyZone> = state
        .store
        .geofences_near(point, radius_m)
        .await?
        .into_iter()
        .map(|n| NearbyZone {
            zone: n.geofence.into(),
            distance_m: n.distance_m,
        })
        .collect();

    Ok(Json(NearbyResponse {
        point,
        radius_m,
        count: zones.len(),
        zones,
    }))
}
