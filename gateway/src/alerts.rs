//! Alert pipeline
//!
//! Raising an alert runs a fixed sequence: insert the row, push notifications,
//! anchor (when enabled), broadcast to dashboards. Everything after the insert
//! is best effort; a failure there is logged and the alert still stands.

use geofence::GeoPoint;
use safety_store::{Alert, AlertKind, Role, User};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::notify::{dispatch, PushMessage};
use crate::realtime::DashboardEvent;
use crate::state::AppState;

pub struct AlertRequest {
    pub kind: AlertKind,
    pub location: Option<GeoPoint>,
    pub message: Option<String>,
}

pub async fn raise_alert(state: &AppState, user: &User, request: AlertRequest) -> ApiResult<Alert> {
    if let Some(point) = &request.location {
        point.validate()?;
    }
    let location = request
        .location
        .or_else(|| user.last_location.map(|fix| fix.point));

    let mut alert = Alert::new(user.id, request.kind, location, request.message);
    if let Some(point) = location {
        alert.geofence_ids = state
            .store
            .geofences_containing(point)
            .await?
            .into_iter()
            .map(|g| g.id)
            .collect();
    }

    let mut alert = state.store.insert_alert(alert).await?;
    info!(
        "Alert {} ({}) raised by {}",
        alert.id,
        alert.kind.as_str(),
        user.id
    );

    notify_alert(state, user, &alert).await;

    if let Some(ledger) = &state.ledger {
        match ledger.anchor(&alert) {
            Ok(receipt) => match state.store.attach_anchor(alert.id, receipt).await {
                Ok(anchored) => alert = anchored,
                Err(e) => warn!("Failed to attach anchor to alert {}: {}", alert.id, e),
            },
            Err(e) => warn!("{}", e),
        }
    }

    state.hub.publish(DashboardEvent::AlertCreated {
        alert: alert.clone(),
    });
    Ok(alert)
}

/// Confirmation to the tourist and a dispatch to every police device
async fn notify_alert(state: &AppState, user: &User, alert: &Alert) {
    let data = serde_json::json!({
        "alert_id": alert.id,
        "kind": alert.kind,
        "user_id": user.id,
    });
    let place = alert
        .location
        .map(|p| format!(" at {:.5}, {:.5}", p.lat, p.lng))
        .unwrap_or_default();

    let mut messages = Vec::new();
    if let Some(token) = &user.push_token {
        messages.push(PushMessage {
            to: token.clone(),
            title: "Alert sent".into(),
            body: "Your alert was received. Help is being dispatched.".into(),
            data: data.clone(),
        });
    }

    match state.store.list_users(Some(Role::Police)).await {
        Ok(officers) => {
            messages.extend(officers.into_iter().filter_map(|officer| {
                officer.push_token.map(|token| PushMessage {
                    to: token,
                    title: format!("{} alert", title_case(alert.kind.as_str())),
                    body: format!("{} raised a {} alert{}", user.name, alert.kind.as_str(), place),
                    data: data.clone(),
                })
            }));
        }
        Err(e) => warn!("Could not load police recipients for alert {}: {}", alert.id, e),
    }

    dispatch(state.notifier.clone(), messages);
}

fn title_case(kind: &str) -> String {
    let words: Vec<String> = kind
        .split('_')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    words.join(" ")
}

/// Only the owning tourist and responders may see an alert
pub fn ensure_can_view(alert: &Alert, viewer_id: Uuid, viewer_role: Role) -> ApiResult<()> {
    if viewer_role.is_responder() || alert.user_id == viewer_id {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("alert {} not found", alert.id)))
    }
}
