//! Sentence embeddings from an ONNX export of all-MiniLM-L6-v2.
//!
//! The model directory must contain `model.onnx` and `tokenizer.json`.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, ensure, Result};
use ort::session::Session;
use ort::value::{Tensor, ValueType};
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};
use tracing::{info, warn};

use super::embedding::Embedder;

const MAX_TOKENS: usize = 256;
const FALLBACK_DIMENSION: usize = 384;

struct Inference {
    session: Session,
    tokenizer: Tokenizer,
}

/// Mean-pooled, L2-normalized sentence embeddings.
pub struct OnnxEmbedder {
    inner: Mutex<Inference>,
    dim: usize,
}

impl OnnxEmbedder {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        ensure!(model_path.exists(), "model.onnx not found in {}", model_dir.display());
        ensure!(tokenizer_path.exists(), "tokenizer.json not found in {}", model_dir.display());

        let session = Session::builder()?.commit_from_file(&model_path)?;
        let dim = output_dim(session.outputs()[0].dtype()).unwrap_or(FALLBACK_DIMENSION);

        let mut tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("set truncation: {e}"))?;
        tokenizer.with_padding(Some(PaddingParams::default()));

        info!("Loaded embedding model {} ({} dimensions)", model_path.display(), dim);
        Ok(Self {
            inner: Mutex::new(Inference { session, tokenizer }),
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn try_embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.lock().map_err(|_| anyhow!("embedding model lock is poisoned"))?;
        let Inference { session, tokenizer } = &mut *inner;

        let encodings = tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow!("tokenize: {e}"))?;
        let batch = texts.len();
        let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);

        let mut input_ids = vec![0i64; batch * seq_len];
        let mut attention_mask = vec![0i64; batch * seq_len];
        let mut token_type_ids = vec![0i64; batch * seq_len];
        for (row, encoding) in encodings.iter().enumerate() {
            let base = row * seq_len;
            let columns = encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .zip(encoding.get_type_ids());
            for (col, ((&id, &mask), &type_id)) in columns.enumerate() {
                input_ids[base + col] = i64::from(id);
                attention_mask[base + col] = i64::from(mask);
                token_type_ids[base + col] = i64::from(type_id);
            }
        }

        let shape = [batch as i64, seq_len as i64];
        let ids_tensor = Tensor::from_array((shape, input_ids.into_boxed_slice()))?;
        let mask_tensor = Tensor::from_array((shape, attention_mask.clone().into_boxed_slice()))?;
        let type_tensor = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))?;
        let outputs = session.run(ort::inputs![
            "input_ids" => ids_tensor,
            "attention_mask" => mask_tensor,
            "token_type_ids" => type_tensor,
        ])?;

        let (output_shape, hidden) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = output_shape;
        ensure!(
            dims.len() == 3 && dims[0] as usize == batch && dims[2] as usize == self.dim,
            "unexpected embedding output shape {dims:?}"
        );
        let out_len = dims[1] as usize;

        let mut vectors = Vec::with_capacity(batch);
        for row in 0..batch {
            let mut pooled = vec![0.0f32; self.dim];
            let mut tokens = 0.0f32;
            for col in 0..out_len.min(seq_len) {
                if attention_mask[row * seq_len + col] == 0 {
                    continue;
                }
                let offset = (row * out_len + col) * self.dim;
                for (slot, value) in pooled.iter_mut().zip(&hidden[offset..offset + self.dim]) {
                    *slot += value;
                }
                tokens += 1.0;
            }
            if tokens > 0.0 {
                pooled.iter_mut().for_each(|x| *x /= tokens);
            }
            l2_normalize(&mut pooled);
            vectors.push(pooled);
        }
        Ok(vectors)
    }
}

impl Embedder for OnnxEmbedder {
    /// Inference failures give empty vectors, which score 0.0 against anything.
    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        self.try_embed(texts).unwrap_or_else(|e| {
            warn!("Embedding failed: {}", e);
            vec![Vec::new(); texts.len()]
        })
    }
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

fn output_dim(output: &ValueType) -> Option<usize> {
    match output {
        ValueType::Tensor { shape, .. } => shape.last().and_then(|&d| (d > 0).then_some(d as usize)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_memory::cosine_similarity;
    use std::path::PathBuf;

    /// Set `EMBEDDING_MODEL_DIR` to run these against a downloaded model.
    fn model_dir() -> Option<PathBuf> {
        std::env::var_os("EMBEDDING_MODEL_DIR")
            .map(PathBuf::from)
            .filter(|dir| dir.join("model.onnx").exists())
    }

    #[test]
    fn test_missing_model_files_are_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = OnnxEmbedder::load(dir.path()).err().unwrap();
        assert!(err.to_string().contains("model.onnx not found"));
    }

    #[test]
    fn test_paraphrases_score_higher() {
        let Some(dir) = model_dir() else {
            return;
        };
        let embedder = OnnxEmbedder::load(&dir).unwrap();
        let vectors = embedder.embed_batch(&[
            "Invoice for office equipment delivery",
            "Bill for supplying office furniture",
            "Court ruling in a criminal case",
        ]);
        assert_eq!(vectors[0].len(), embedder.dim());
        let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert!(cosine_similarity(&vectors[0], &vectors[1]) > cosine_similarity(&vectors[0], &vectors[2]));
    }
}
