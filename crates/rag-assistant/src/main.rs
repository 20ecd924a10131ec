use anyhow::Result;
use axum::{routing::get, Json, Router};
use std::{future::Future, io, sync::Arc};
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rag_assistant::{assistant_routes, Assistant};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rag_assistant=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let assistant = Arc::new(Assistant::with_guidance());
    info!("   Loaded {} guidance documents", assistant.document_count());

    let app = Router::new()
        .route("/", get(root))
        .merge(assistant_routes(assistant))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let port = std::env::var("RAG_ASSISTANT_PORT").unwrap_or_else(|_| "18710".to_string());
    let addr = format!("0.0.0.0:{}", port);
    info!("RAG assistant starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_on(signal::ctrl_c()))
        .await?;

    Ok(())
}

/// Resolves when `ctrl_c` fires; never resolves if the handler fails to install
async fn shutdown_on(ctrl_c: impl Future<Output = io::Result<()>>) {
    match ctrl_c.await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "rag-assistant",
        "endpoints": ["/health", "/embed", "/search", "/ask", "/documents"]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_shutdown_on_signal() {
        let done = timeout(Duration::from_millis(100), shutdown_on(async { Ok(()) })).await;
        assert!(done.is_ok());
    }

    #[tokio::test]
    async fn test_failed_handler_keeps_serving() {
        let failed = async { Err(io::Error::new(io::ErrorKind::Other, "no signal driver")) };
        let done = timeout(Duration::from_millis(100), shutdown_on(failed)).await;
        assert!(done.is_err());
    }
}
