//! RAG Assistant
//!
//! A mocked retrieval-augmented assistant for tourist safety questions.
//! There is no language model: answers are stitched together from the best
//! matching guidance documents.
//!
//! - [`Embedder`]: deterministic feature-hashing embeddings
//! - [`VectorIndex`]: cosine-similarity search over documents
//! - [`Assistant`]: built-in safety corpus plus question answering
//! - [`routes::assistant_routes`]: axum router, mounted by the gateway or
//!   served standalone by the `rag-assistant` binary

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

pub mod assistant;
mod corpus;
pub mod embed;
pub mod index;
pub mod routes;

pub use assistant::{Answer, Assistant, Source, FALLBACK_ANSWER};
pub use embed::{cosine_similarity, Embedder, DEFAULT_DIM};
pub use index::{Document, Hit, NewDocument, VectorIndex};
pub use routes::{assistant_routes, document_routes, query_routes};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RagError {
    #[error("Embedding dimension must be positive, got {0}")]
    InvalidDimension(usize),

    #[error("Query is empty")]
    EmptyQuery,

    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

pub type Result<T> = std::result::Result<T, RagError>;

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let status = match self {
            RagError::InvalidDimension(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RagError::EmptyQuery | RagError::InvalidDocument(_) => StatusCode::BAD_REQUEST,
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
