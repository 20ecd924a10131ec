//! Dashboard API Routes

use axum::{extract::State, routing::get, Json, Router};
use safety_store::StoreStats;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Serialize)]
pub struct DashboardStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub backend: &'static str,
    pub connected_dashboards: usize,
    /// None when anchoring is disabled
    pub anchor_height: Option<u64>,
    pub assistant_documents: usize,
}

pub fn dashboard_routes() -> Router<AppState> {
    Router::new().route("/stats", get(stats))
}

async fn stats(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<DashboardStats>> {
    auth.require_responder()?;

    Ok(Json(DashboardStats {
        store: state.store.stats().await?,
        backend: state.store.backend(),
        connected_dashboards: state.hub.connected(),
        anchor_height: state.ledger.as_ref().map(|l| l.height()),
        assistant_documents: state.assistant.document_count(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use axum::http::StatusCode;
    use safety_store::Role;
    use serde_json::json;

    #[tokio::test]
    async fn test_stats() {
        let app = TestApp::new();
        let tourist = app.register_tourist("s@example.com").await;
        let police = app.staff(Role::Police, "s@police.example").await;
        app.post("/api/v1/alerts", Some(&tourist.access_token), json!({}))
            .await;

        let (status, stats) = app
            .get("/api/v1/dashboard/stats", Some(&police.access_token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["users"], 2);
        assert_eq!(stats["tourists"], 1);
        assert_eq!(stats["open_alerts"], 1);
        assert_eq!(stats["backend"], "memory");
        assert_eq!(stats["connected_dashboards"], 0);
        assert!(stats["anchor_height"].is_null());
        assert!(stats["assistant_documents"].as_u64().unwrap() > 0);

        let (status, _) = app
            .get("/api/v1/dashboard/stats", Some(&tourist.access_token))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_ws_requires_responder() {
        let app = TestApp::new();
        let tourist = app.register_tourist("ws@example.com").await;
        let police = app.staff(Role::Police, "ws@police.example").await;

        let (status, _) = app.get("/api/v1/ws", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let uri = format!("/api/v1/ws?token={}", tourist.access_token);
        let (status, _) = app.get(&uri, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // authenticated, but a plain GET is not an upgrade
        let uri = format!("/api/v1/ws?token={}", police.access_token);
        let (status, _) = app.get(&uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
