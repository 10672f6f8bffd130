//! Text embedding seam for semantic discovery.
//!
//! The encoder is pluggable so a real sentence-encoding model can sit behind
//! it. The default is a deterministic feature-hashing encoder: no model
//! download, bounded encode time, and stable vectors across runs, which the
//! discovery cache and the tests both rely on.

use sha2::{Digest, Sha256};

/// Fixed embedding width shared by every tool and query vector.
pub const EMBEDDING_DIM: usize = 384;

/// Deterministic text-to-vector encoding.
pub trait Encoder: Send + Sync {
    fn dim(&self) -> usize;

    /// Encode text into a vector of `dim()` floats. Must be finite for any
    /// input; the zero vector is the representation of empty text.
    fn encode(&self, text: &str) -> Vec<f32>;
}

/// Feature-hashing encoder over lowercased words and character trigrams.
pub struct HashingEncoder {
    dim: usize,
}

impl HashingEncoder {
    pub fn new() -> Self {
        Self { dim: EMBEDDING_DIM }
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let bucket = u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
        let index = (bucket % self.dim as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

impl Default for HashingEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for HashingEncoder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            // whole words carry more signal than their trigrams
            self.accumulate(&mut vector, &word, 2.0);

            let chars: Vec<char> = word.chars().collect();
            if chars.len() > 3 {
                for window in chars.windows(3) {
                    let trigram: String = window.iter().collect();
                    self.accumulate(&mut vector, &trigram, 1.0);
                }
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// Cosine similarity with zero-norm and non-finite guards; never NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}
