use sha2::{Digest, Sha256};

use crate::vector::normalize;

/// Text-to-vector capability consumed by the server.
///
/// Implementations must be deterministic (equal input, bit-equal output),
/// return unit-length vectors for non-empty input, and return the all-zero
/// vector for the empty string. `dimension()` must match the engine's
/// configured dimension.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dimension(&self) -> usize;
}

/// Hash-expansion embedder: SHA-256 of the text, digest bytes folded out
/// to the full dimension and normalized. A correctness harness standing in
/// for a real sentence encoder; nearby texts do NOT get nearby vectors,
/// but equal texts always collide exactly, which is what the engine tests
/// need.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        if text.is_empty() {
            return embedding;
        }

        let digest = Sha256::digest(text.as_bytes());
        let len = digest.len();

        for (i, out) in embedding.iter_mut().enumerate() {
            let a = digest[i % len];
            let b = digest[(i / len) % len];
            let combined = a ^ b;
            *out = (combined as f32 / 255.0) * 2.0 - 1.0;
        }

        normalize(&mut embedding);
        embedding
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
