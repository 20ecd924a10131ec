//! Feature-hashing embedder
//!
//! Each token is hashed with SHA-256 into one of `dim` buckets, with the sign
//! taken from a second hash byte so unrelated tokens tend to cancel rather than
//! pile up. The result is L2-normalised, which makes cosine similarity a plain
//! dot product for any two embeddings from the same embedder.

use sha2::{Digest, Sha256};

use crate::{RagError, Result};

pub const DEFAULT_DIM: usize = 64;

/// Tokens shorter than this are dropped
const MIN_TOKEN_CHARS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Embedder {
    dim: usize,
}

impl Embedder {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(RagError::InvalidDimension(dim));
        }
        Ok(Self { dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Lowercased alphanumeric tokens of at least two characters
    pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
            .map(str::to_lowercase)
    }

    /// Empty or token-free input gives the zero vector
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];

        for token in Self::tokenize(text) {
            let hash = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&hash[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dim as u64) as usize;
            let sign = if hash[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for Embedder {
    fn default() -> Self {
        Self { dim: DEFAULT_DIM }
    }
}

/// Cosine similarity; 0.0 for zero vectors or mismatched lengths
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
