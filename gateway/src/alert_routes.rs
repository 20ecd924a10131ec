//! Alert API Routes
//!
//! - POST /alerts                       panic button (tourists)
//! - GET  /alerts                       responders see all, tourists their own
//! - GET  /alerts/:id
//! - POST /alerts/:id/acknowledge
//! - POST /alerts/:id/resolve
//! - GET  /alerts/:id/anchor/verify

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use geofence::GeoPoint;
use safety_store::{Alert, AlertFilter, AlertKind, AlertStatus, AnchorReceipt, Role};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::alerts::{ensure_can_view, raise_alert, AlertRequest};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiJson, ApiQuery, ApiResult};
use crate::realtime::DashboardEvent;
use crate::state::AppState;
use crate::tourist_routes::load_user;

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Deserialize)]
pub struct CreateAlertRequest {
    #[serde(default = "default_kind")]
    pub kind: AlertKind,
    pub location: Option<GeoPoint>,
    pub message: Option<String>,
}

fn default_kind() -> AlertKind {
    AlertKind::Panic
}

#[derive(Serialize)]
pub struct AnchorVerification {
    pub alert_id: Uuid,
    pub anchoring_enabled: bool,
    pub anchored: bool,
    /// Alert still matches its receipt
    pub valid: bool,
    pub chain_valid: bool,
    pub ledger_height: u64,
    pub receipt: Option<AnchorReceipt>,
}

pub fn alert_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_alerts).post(create_alert))
        .route("/:id", get(get_alert))
        .route("/:id/acknowledge", post(acknowledge))
        .route("/:id/resolve", post(resolve))
        .route("/:id/anchor/verify", get(verify_anchor))
}

async fn create_alert(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<CreateAlertRequest>,
) -> ApiResult<(StatusCode, Json<Alert>)> {
    auth.require_role(&[Role::Tourist])?;
    // breach alerts come from location updates only
    if req.kind == AlertKind::GeofenceBreach {
        return Err(ApiError::BadRequest(
            "geofence_breach alerts are raised by location updates".into(),
        ));
    }

    let user = load_user(&state, auth.id).await?;
    let alert = raise_alert(
        &state,
        &user,
        AlertRequest {
            kind: req.kind,
            location: req.location,
            message: req.message.filter(|m| !m.trim().is_empty()),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(alert)))
}

async fn list_alerts(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(mut filter): ApiQuery<AlertFilter>,
) -> ApiResult<Json<Vec<Alert>>> {
    if !auth.role.is_responder() {
        filter.user_id = Some(auth.id);
    }
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT));

    Ok(Json(state.store.list_alerts(filter).await?))
}

async fn load_alert(state: &AppState, id: Uuid) -> ApiResult<Alert> {
    state
        .store
        .alert(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("alert {id} not found")))
}

async fn get_alert(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Alert>> {
    let alert = load_alert(&state, id).await?;
    ensure_can_view(&alert, auth.id, auth.role)?;
    Ok(Json(alert))
}

async fn transition(
    state: &AppState,
    auth: AuthUser,
    id: Uuid,
    status: AlertStatus,
) -> ApiResult<Json<Alert>> {
    auth.require_responder()?;
    let alert = state.store.transition_alert(id, status, auth.id).await?;
    info!("Alert {} {} by {}", id, status.as_str(), auth.id);

    state.hub.publish(DashboardEvent::AlertUpdated {
        alert: alert.clone(),
    });
    Ok(Json(alert))
}

async fn acknowledge(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Alert>> {
    transition(&state, auth, id, AlertStatus::Acknowledged).await
}

async fn resolve(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Alert>> {
    transition(&state, auth, id, AlertStatus::Resolved).await
}

async fn verify_anchor(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AnchorVerification>> {
    auth.require_responder()?;
    let alert = load_alert(&state, id).await?;

    let Some(ledger) = &state.ledger else {
        return Ok(Json(AnchorVerification {
            alert_id: id,
            anchoring_enabled: false,
            anchored: alert.anchor.is_some(),
            valid: false,
            chain_valid: false,
            ledger_height: 0,
            receipt: alert.anchor,
        }));
    };

    let valid = alert
        .anchor
        .as_ref()
        .is_some_and(|receipt| ledger.verify(&alert, receipt));

    Ok(Json(AnchorVerification {
        alert_id: id,
        anchoring_enabled: true,
        anchored: alert.anchor.is_some(),
        valid,
        chain_valid: ledger.verify_chain(),
        ledger_height: ledger.height(),
        receipt: alert.anchor,
    }))
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::realtime::DashboardEvent;
    use crate::test_support::*;
    use axum::http::StatusCode;
    use safety_store::{AlertStatus, Role};
    use serde_json::json;

    #[tokio::test]
    async fn test_panic_flow() {
        let app = TestApp::new();
        let tourist = app.register_tourist("panic@example.com").await;
        let police = app.staff(Role::Police, "desk@police.example").await;

        let (status, alert) = app
            .post(
                "/api/v1/alerts",
                Some(&tourist.access_token),
                json!({ "location": { "lat": 27.1751, "lng": 78.0421 }, "message": "followed" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{alert}");
        assert_eq!(alert["kind"], "panic");
        assert_eq!(alert["status"], "open");
        let id = alert["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .post(&format!("/api/v1/alerts/{id}/acknowledge"), Some(&police.access_token), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);

        // acknowledging twice is not a valid transition
        let (status, _) = app
            .post(&format!("/api/v1/alerts/{id}/acknowledge"), Some(&police.access_token), json!({}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, resolved) = app
            .post(&format!("/api/v1/alerts/{id}/resolve"), Some(&police.access_token), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved["status"], "resolved");
        assert_eq!(resolved["resolved_by"], police.user_id.to_string());
    }

    #[tokio::test]
    async fn test_transitions_are_broadcast() {
        let app = TestApp::new();
        let tourist = app.register_tourist("loud@example.com").await;
        let police = app.staff(Role::Police, "loud@police.example").await;
        let (_, alert) = app
            .post("/api/v1/alerts", Some(&tourist.access_token), json!({}))
            .await;
        let id = alert["id"].as_str().unwrap().to_string();

        let mut rx = app.state.hub.subscribe();
        app.post(&format!("/api/v1/alerts/{id}/acknowledge"), Some(&police.access_token), json!({}))
            .await;
        app.post(&format!("/api/v1/alerts/{id}/resolve"), Some(&police.access_token), json!({}))
            .await;

        for expected in [AlertStatus::Acknowledged, AlertStatus::Resolved] {
            match rx.recv().await.unwrap() {
                DashboardEvent::AlertUpdated { alert } => {
                    assert_eq!(alert.id.to_string(), id);
                    assert_eq!(alert.status, expected);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_visibility() {
        let app = TestApp::new();
        let alice = app.register_tourist("alice@example.com").await;
        let bob = app.register_tourist("bob@example.com").await;
        let admin = app.staff(Role::Admin, "admin@example.com").await;

        let (_, alert) = app
            .post("/api/v1/alerts", Some(&alice.access_token), json!({ "kind": "medical" }))
            .await;
        app.post("/api/v1/alerts", Some(&bob.access_token), json!({})).await;
        let id = alert["id"].as_str().unwrap();

        let (status, _) = app
            .get(&format!("/api/v1/alerts/{id}"), Some(&bob.access_token))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .get(&format!("/api/v1/alerts/{id}"), Some(&alice.access_token))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, own) = app.get("/api/v1/alerts", Some(&bob.access_token)).await;
        assert_eq!(own.as_array().unwrap().len(), 1);

        let (_, all) = app.get("/api/v1/alerts", Some(&admin.access_token)).await;
        assert_eq!(all.as_array().unwrap().len(), 2);

        let (_, medical) = app
            .get("/api/v1/alerts?kind=medical&status=open", Some(&admin.access_token))
            .await;
        assert_eq!(medical.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_role_rules() {
        let app = TestApp::new();
        let tourist = app.register_tourist("t@example.com").await;
        let police = app.staff(Role::Police, "p@example.com").await;

        let (status, _) = app
            .post("/api/v1/alerts", Some(&police.access_token), json!({}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .post(
                "/api/v1/alerts",
                Some(&tourist.access_token),
                json!({ "kind": "geofence_breach" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, alert) = app
            .post("/api/v1/alerts", Some(&tourist.access_token), json!({}))
            .await;
        let id = alert["id"].as_str().unwrap();
        let (status, _) = app
            .post(&format!("/api/v1/alerts/{id}/resolve"), Some(&tourist.access_token), json!({}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.post("/api/v1/alerts", None, json!({})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_anchor_verification() {
        let app = TestApp::with_config(Config {
            anchor_enabled: true,
            ..Config::default()
        });
        let tourist = app.register_tourist("chain@example.com").await;
        let police = app.staff(Role::Police, "chain@police.example").await;

        let (_, alert) = app
            .post("/api/v1/alerts", Some(&tourist.access_token), json!({ "message": "help" }))
            .await;
        assert!(alert["anchor"]["tx_hash"].as_str().unwrap().starts_with("0x"));
        let id = alert["id"].as_str().unwrap();

        // status changes leave the anchored fields alone
        app.post(&format!("/api/v1/alerts/{id}/resolve"), Some(&police.access_token), json!({}))
            .await;

        let (status, check) = app
            .get(&format!("/api/v1/alerts/{id}/anchor/verify"), Some(&police.access_token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(check["anchored"], true);
        assert_eq!(check["valid"], true);
        assert_eq!(check["chain_valid"], true);
        assert_eq!(check["ledger_height"], 1);
    }

    #[tokio::test]
    async fn test_verification_without_ledger() {
        let app = TestApp::new();
        let tourist = app.register_tourist("plain@example.com").await;
        let police = app.staff(Role::Police, "plain@police.example").await;
        let (_, alert) = app
            .post("/api/v1/alerts", Some(&tourist.access_token), json!({}))
            .await;
        let id = alert["id"].as_str().unwrap();

        let (status, check) = app
            .get(&format!("/api/v1/alerts/{id}/anchor/verify"), Some(&police.access_token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(check["anchoring_enabled"], false);
        assert_eq!(check["valid"], false);
    }
}
