use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};
use tracing::warn;

use crate::config::Config;

pub const DEFAULT_DIMENSION: usize = 512;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\p{L}+|\p{N}+").expect("token pattern should compile"));

/// Text embedding capability used for document similarity.
pub trait Embedder: Send + Sync {
    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>>;
}

/// Feature-hashed bag of lower-cased words and character trigrams, L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        (hasher.finish() % self.dimension as u64) as usize
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in TOKEN_RE.find_iter(text) {
            let word = token.as_str().to_lowercase();
            vector[self.bucket(&word)] += 1.0;

            let padded: Vec<char> = format!(" {} ", word).chars().collect();
            for trigram in padded.windows(3) {
                let gram: String = trigram.iter().collect();
                vector[self.bucket(&format!("#{}", gram))] += 0.5;
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// The ONNX sentence model when built with `onnx` and `EMBEDDING_MODEL_DIR`
/// loads, otherwise the hashing embedder.
pub fn default_embedder(config: &Config) -> Arc<dyn Embedder> {
    let Some(model_dir) = &config.embedding_model_dir else {
        return Arc::new(HashingEmbedder::default());
    };

    #[cfg(feature = "onnx")]
    match super::onnx::OnnxEmbedder::load(model_dir) {
        Ok(embedder) => return Arc::new(embedder),
        Err(e) => warn!("Falling back to hashing embeddings: {:#}", e),
    }

    #[cfg(not(feature = "onnx"))]
    warn!(
        "EMBEDDING_MODEL_DIR={} ignored, built without the onnx feature",
        model_dir.display()
    );

    Arc::new(HashingEmbedder::default())
}

/// Cosine similarity; 0.0 for empty, mismatched or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

/// String similarity used to match stored corrections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FuzzyMetric {
    #[default]
    JaroWinkler,
    /// Levenshtein ratio, `1 - distance / max_len`.
    Levenshtein,
}

impl FuzzyMetric {
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        match self {
            FuzzyMetric::JaroWinkler => strsim::jaro_winkler(a, b),
            FuzzyMetric::Levenshtein => strsim::normalized_levenshtein(a, b),
        }
    }
}
