//! Real-time dashboard feed
//!
//! Handlers publish [`DashboardEvent`]s to a broadcast channel; every open
//! dashboard WebSocket holds a receiver and forwards events as JSON text
//! frames. A receiver that falls behind gets a `Lagged` frame with the number
//! of skipped events and carries on from the oldest retained one.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use geofence::GeoPoint;
use safety_store::{Alert, ZoneKind};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceAction {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum DashboardEvent {
    LocationUpdated {
        user_id: Uuid,
        point: GeoPoint,
        recorded_at: DateTime<Utc>,
        geofence_ids: Vec<Uuid>,
        max_risk: Option<ZoneKind>,
    },
    AlertCreated {
        alert: Alert,
    },
    AlertUpdated {
        alert: Alert,
    },
    GeofenceChanged {
        geofence_id: Uuid,
        action: GeofenceAction,
    },
}

impl DashboardEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LocationUpdated { .. } => "LocationUpdated",
            Self::AlertCreated { .. } => "AlertCreated",
            Self::AlertUpdated { .. } => "AlertUpdated",
            Self::GeofenceChanged { .. } => "GeofenceChanged",
        }
    }
}

#[derive(Clone)]
pub struct RealtimeHub {
    tx: broadcast::Sender<DashboardEvent>,
    sessions: Arc<AtomicUsize>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }

    /// Returns how many receivers got the event
    pub fn publish(&self, event: DashboardEvent) -> usize {
        let kind = event.event_type();
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                debug!("No dashboard listeners for {}", kind);
                0
            }
        }
    }

    /// Open dashboard sessions
    pub fn connected(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    fn track_session(&self) -> SessionGuard {
        self.sessions.fetch_add(1, Ordering::Relaxed);
        SessionGuard(self.sessions.clone())
    }
}

struct SessionGuard(Arc<AtomicUsize>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Text frame for a receive result, `None` once the channel is closed
fn frame_for(result: Result<DashboardEvent, RecvError>) -> Option<String> {
    match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Failed to encode {}: {}", event.event_type(), e);
                Some(String::new())
            }
        },
        Err(RecvError::Lagged(skipped)) => {
            Some(serde_json::json!({ "type": "Lagged", "skipped": skipped }).to_string())
        }
        Err(RecvError::Closed) => None,
    }
}

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /ws`: police/admin dashboard socket. The access token comes from
/// `?token=` (browsers cannot set headers on WebSocket requests) or the
/// Authorization header.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> ApiResult<Response> {
    let token = query
        .token
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .ok_or_else(|| ApiError::Unauthorized("Missing access token".into()))?;

    let user = AuthUser::from_token(&state, &token)?;
    user.require_responder()?;

    let ws = ws.ok_or_else(|| ApiError::BadRequest("Expected a WebSocket upgrade".into()))?;
    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| run_session(socket, hub, user)))
}

async fn run_session(socket: WebSocket, hub: RealtimeHub, user: AuthUser) {
    let mut rx = hub.subscribe();
    let _guard = hub.track_session();
    let (mut sender, mut receiver) = socket.split();
    info!("Dashboard session opened for {} ({} open)", user.id, hub.connected());

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(text) = frame_for(event) else { break };
                if text.is_empty() {
                    continue;
                }
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) if text.trim() == "ping" => {
                    if sender.send(Message::Text("pong".into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!("Dashboard session closed for {}", user.id);
}
