//! Question answering over the guidance corpus

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::corpus::safety_guidance;
use crate::embed::Embedder;
use crate::index::{Hit, NewDocument, VectorIndex};
use crate::Result;

pub const FALLBACK_ANSWER: &str = "I could not find guidance for that question. \
     In an emergency press the panic button in the app or dial 112 for police, fire and ambulance.";

/// Hits below this similarity are not used to compose an answer
const MIN_ANSWER_SCORE: f32 = 0.15;

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub fallback: bool,
}

pub struct Assistant {
    index: RwLock<VectorIndex>,
}

impl Assistant {
    pub fn new(index: VectorIndex) -> Self {
        Self {
            index: RwLock::new(index),
        }
    }

    /// Assistant seeded with the built-in safety corpus
    pub fn with_guidance() -> Self {
        let mut index = VectorIndex::default();
        for doc in safety_guidance() {
            let id = doc.id.clone();
            if let Err(e) = index.upsert(doc) {
                warn!("Skipping built-in guidance document '{}': {}", id, e);
            }
        }
        Self::new(index)
    }

    pub fn embedder(&self) -> Embedder {
        *self.index.read().embedder()
    }

    pub fn document_count(&self) -> usize {
        self.index.read().len()
    }

    pub fn add_document(&self, doc: NewDocument) -> Result<bool> {
        self.index.write().upsert(doc)
    }

    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<Hit>> {
        self.index.read().search(query, top_k)
    }

    /// Compose an answer from the best matching documents, or the fallback
    pub fn ask(&self, question: &str, top_k: usize) -> Result<Answer> {
        let hits: Vec<Hit> = self
            .search(question, top_k.max(1))?
            .into_iter()
            .filter(|h| h.score >= MIN_ANSWER_SCORE)
            .collect();

        debug!("Assistant matched {} documents for {:?}", hits.len(), question);

        if hits.is_empty() {
            return Ok(Answer {
                question: question.to_string(),
                answer: FALLBACK_ANSWER.to_string(),
                sources: Vec::new(),
                fallback: true,
            });
        }

        let answer = hits
            .iter()
            .map(|h| h.body.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let sources = hits
            .into_iter()
            .map(|h| Source {
                id: h.id,
                title: h.title,
                score: h.score,
            })
            .collect();

        Ok(Answer {
            question: question.to_string(),
            answer,
            sources,
            fallback: false,
        })
    }
}

impl Default for Assistant {
    fn default() -> Self {
        Self::with_guidance()
    }
}
