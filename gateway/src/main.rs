use anyhow::Result;
use axum::{extract::State, middleware, routing::get, Json, Router};
use safety_store::{InMemoryStore, SafetyStore};
use std::sync::Arc;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod admin_routes;
mod alert_routes;
mod alerts;
mod anchor;
mod auth;
mod auth_routes;
mod config;
mod dashboard_routes;
mod error;
mod geofence_routes;
mod notify;
mod realtime;
mod state;
mod tourist_routes;

#[cfg(test)]
mod test_support;

use config::Config;
use state::AppState;

#[cfg(feature = "postgres")]
const DB_MAX_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "safety_gateway=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let store = open_store(&config).await?;
    info!("   Store backend: {}", store.backend());

    let state = AppState::new(config, store);
    info!("   Notifier: {}", state.notifier.name());
    if state.ledger.is_some() {
        info!("   Alert anchoring enabled");
    }
    info!("   Assistant corpus: {} documents", state.assistant.document_count());

    let addr = format!("0.0.0.0:{}", state.config.port);
    let app = router(state);

    info!("Safety Gateway starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Safety Gateway stopped");
    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn SafetyStore>> {
    #[cfg(feature = "postgres")]
    if let Some(url) = &config.database_url {
        let store = safety_store::PostgresStore::connect(url, DB_MAX_CONNECTIONS).await?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "postgres"))]
    if config.database_url.is_some() {
        warn!("DATABASE_URL is set but this build has no postgres feature; using in-memory store");
    }

    Ok(Arc::new(InMemoryStore::new()))
}

/// Full API surface; tests drive this directly
pub(crate) fn router(state: AppState) -> Router {
    let assistant = state.assistant.clone();

    let api = Router::new()
        .nest("/auth", auth_routes::auth_routes())
        .nest("/tourists", tourist_routes::tourist_routes())
        .nest("/admin", admin_routes::admin_routes())
        .nest("/geofences", geofence_routes::geofence_routes())
        .nest("/alerts", alert_routes::alert_routes())
        .nest("/dashboard", dashboard_routes::dashboard_routes())
        .route("/ws", get(realtime::ws_handler));

    // any signed-in user may query; only responders change the corpus
    let assistant_api = rag_assistant::query_routes(assistant.clone())
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth))
        .merge(
            rag_assistant::document_routes(assistant)
                .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_responder)),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .with_state(state)
        .nest("/api/v1/assistant", assistant_api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "safety-gateway",
        "backend": state.store.backend(),
        "anchoring": state.ledger.is_some(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
