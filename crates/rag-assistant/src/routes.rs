//! Assistant HTTP routes
//!
//! - `GET  /health`    document count and embedding dimension
//! - `POST /embed`     embedding for a piece of text
//! - `POST /search`    ranked documents for a query
//! - `POST /ask`       composed answer with sources
//! - `POST /documents` add or replace a guidance document

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::assistant::{Answer, Assistant};
use crate::index::{Hit, NewDocument};
use crate::RagError;

const DEFAULT_TOP_K: usize = 3;
const MAX_TOP_K: usize = 20;

// ========== Request/Response Types ==========

#[derive(Deserialize)]
pub struct EmbedRequest {
    pub text: String,
}

#[derive(Serialize)]
pub struct EmbedResponse {
    pub dim: usize,
    pub embedding: Vec<f32>,
}

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub hits: Vec<Hit>,
}

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub top_k: Option<usize>,
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub replaced: bool,
    pub documents: usize,
}

/// Router with its own state, ready to nest or serve
pub fn assistant_routes(assistant: Arc<Assistant>) -> Router {
    query_routes(assistant.clone()).merge(document_routes(assistant))
}

/// Read-only routes: health, embed, search and ask
pub fn query_routes(assistant: Arc<Assistant>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/embed", post(embed))
        .route("/search", post(search))
        .route("/ask", post(ask))
        .with_state(assistant)
}

/// Corpus writes; hosts mounting this should restrict who may call it
pub fn document_routes(assistant: Arc<Assistant>) -> Router {
    Router::new()
        .route("/documents", post(add_document))
        .with_state(assistant)
}

fn top_k(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K)
}

async fn health(State(assistant): State<Arc<Assistant>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "rag-assistant",
        "documents": assistant.document_count(),
        "dim": assistant.embedder().dim(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn embed(
    State(assistant): State<Arc<Assistant>>,
    Json(req): Json<EmbedRequest>,
) -> Json<EmbedResponse> {
    let embedder = assistant.embedder();
    Json(EmbedResponse {
        dim: embedder.dim(),
        embedding: embedder.embed(&req.text),
    })
}

async fn search(
    State(assistant): State<Arc<Assistant>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, RagError> {
    let hits = assistant.search(&req.query, top_k(req.top_k))?;
    Ok(Json(SearchResponse {
        query: req.query,
        count: hits.len(),
        hits,
    }))
}

async fn ask(
    State(assistant): State<Arc<Assistant>>,
    Json(req): Json<AskRequest>,
) -> Result<Json<Answer>, RagError> {
    assistant.ask(&req.question, top_k(req.top_k)).map(Json)
}

async fn add_document(
    State(assistant): State<Arc<Assistant>>,
    Json(doc): Json<NewDocument>,
) -> Result<(StatusCode, Json<DocumentResponse>), RagError> {
    let id = doc.id.trim().to_string();
    let replaced = assistant.add_document(doc)?;
    let status = if replaced { StatusCode::OK } else { StatusCode::CREATED };

    Ok((
        status,
        Json(DocumentResponse {
            id,
            replaced,
            documents: assistant.document_count(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
    };
    use tower::ServiceExt;

    fn app() -> Router {
        assistant_routes(Arc::new(Assistant::with_guidance()))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["documents"], 10);
        assert_eq!(body["dim"], 64);
    }

    #[tokio::test]
    async fn test_embed() {
        let response = app()
            .oneshot(post_json("/embed", serde_json::json!({ "text": "safe route" })))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["embedding"].as_array().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_search_caps_top_k() {
        let response = app()
            .oneshot(post_json(
                "/search",
                serde_json::json!({ "query": "the police", "top_k": 500 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["count"].as_u64().unwrap() <= MAX_TOP_K as u64);
    }

    #[tokio::test]
    async fn test_ask_empty_question_is_bad_request() {
        let response = app()
            .oneshot(post_json("/ask", serde_json::json!({ "question": "" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_add_then_replace_document() {
        let app = app();
        let doc = serde_json::json!({
            "id": "ferry",
            "title": "Ferry timings",
            "body": "The last ferry leaves at six"
        });

        let created = app.clone().oneshot(post_json("/documents", doc.clone())).await.unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        assert_eq!(json_body(created).await["documents"], 11);

        let replaced = app.oneshot(post_json("/documents", doc)).await.unwrap();
        assert_eq!(replaced.status(), StatusCode::OK);
    }
}
