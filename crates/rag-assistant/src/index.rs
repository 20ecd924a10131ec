//! Cosine-similarity document index

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::embed::{cosine_similarity, Embedder};
use crate::{RagError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
}

/// Document as submitted, before embedding
#[derive(Debug, Clone, Deserialize)]
pub struct NewDocument {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub id: String,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    embedder: Embedder,
    documents: BTreeMap<String, Document>,
}

impl VectorIndex {
    pub fn new(embedder: Embedder) -> Self {
        Self {
            embedder,
            documents: BTreeMap::new(),
        }
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    /// Insert or replace a document. Returns true if one was replaced.
    pub fn upsert(&mut self, doc: NewDocument) -> Result<bool> {
        let id = doc.id.trim().to_string();
        if id.is_empty() {
            return Err(RagError::InvalidDocument("id is empty".into()));
        }
        if doc.title.trim().is_empty() || doc.body.trim().is_empty() {
            return Err(RagError::InvalidDocument(format!("{id}: title and body are required")));
        }

        // Title and tags count toward the embedding so short bodies still match
        let text = format!("{} {} {}", doc.title, doc.tags.join(" "), doc.body);
        let embedding = self.embedder.embed(&text);

        let replaced = self
            .documents
            .insert(
                id.clone(),
                Document {
                    id,
                    title: doc.title,
                    body: doc.body,
                    tags: doc.tags,
                    embedding,
                },
            )
            .is_some();
        Ok(replaced)
    }

    /// Top `top_k` documents by cosine similarity, best first, ties by id.
    /// Documents scoring zero or below are never returned.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<Hit>> {
        if query.trim().is_empty() {
            return Err(RagError::EmptyQuery);
        }

        let q = self.embedder.embed(query);
        let mut scored: Vec<(&Document, f32)> = self
            .documents
            .values()
            .map(|d| (d, cosine_similarity(&q, &d.embedding)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        // Stable sort over id-ordered input keeps ties by id
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(d, score)| Hit {
                id: d.id.clone(),
                title: d.title.clone(),
                body: d.body.clone(),
                tags: d.tags.clone(),
                score,
            })
            .collect())
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new(Embedder::default())
    }
}
