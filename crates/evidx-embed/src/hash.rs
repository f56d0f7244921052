//! Deterministic, model-free embedding providers.
//!
//! Both are reproducible across runs and machines; they exist so indexing
//! and search can be exercised without model weights.

use sha2::{Digest, Sha256};
use std::hash::Hasher;
use twox_hash::XxHash64;

use evidx_core::error::Result;
use evidx_core::traits::{l2_normalize, EmbeddingProvider, Embeddings};

/// Feature-hashing embedder: every lowercase alphanumeric token lands in a
/// bucket with a positive weight, so texts sharing words get positive cosine
/// similarity and unrelated texts sit near zero.
pub struct TokenHashEmbedder {
    dim: usize,
    model: String,
}

impl TokenHashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, model: format!("token-hash-d{dim}") }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let token = token.to_lowercase();
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.as_bytes());
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let jitter = ((h >> 32) as u32) as f32 / u32::MAX as f32;
            v[idx] += 0.5 + 0.5 * jitter;
        }
        l2_normalize(&mut v);
        v
    }
}

impl EmbeddingProvider for TokenHashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Embeddings> {
        let vectors = texts.iter().map(|t| self.embed_one(t)).collect();
        Ok(Embeddings { vectors, model: self.model.clone() })
    }
}

/// Whole-text digest embedder: SHA-256 of the text tiled to `dim` bytes,
/// scaled to `[-1, 1]` and L2-normalized. Identical texts map to identical
/// vectors; anything else is effectively random.
pub struct DigestEmbedder {
    dim: usize,
    model: String,
}

impl DigestEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, model: format!("digest-sha256-d{dim}") }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut v: Vec<f32> = digest
            .iter()
            .cycle()
            .take(self.dim)
            .map(|&b| f32::from(b) / 127.5 - 1.0)
            .collect();
        l2_normalize(&mut v);
        v
    }
}

impl EmbeddingProvider for DigestEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Embeddings> {
        let vectors = texts.iter().map(|t| self.embed_one(t)).collect();
        Ok(Embeddings { vectors, model: self.model.clone() })
    }
}
