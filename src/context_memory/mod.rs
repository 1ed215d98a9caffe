//! Persistent memory of previously analysed documents and user corrections.
//!
//! Stored documents feed few-shot examples to the generative stage; stored
//! corrections fill fields that extraction left empty. Every mutation rewrites
//! the JSON file while holding the memory lock.

pub mod embedding;
#[cfg(feature = "onnx")]
pub mod onnx;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::models::{FieldMap, MetadataField, MetadataRecord};
use crate::utils::text::truncate_chars;

pub use embedding::{cosine_similarity, default_embedder, Embedder, FuzzyMetric, HashingEmbedder};
#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbedder;

pub const MAX_DOCUMENTS: usize = 100;
pub const MAX_CORRECTIONS: usize = 200;
pub const DOCUMENT_FRAGMENT_CHARS: usize = 2000;
pub const CORRECTION_FRAGMENT_CHARS: usize = 1000;
pub const CORRECTION_SIMILARITY_THRESHOLD: f64 = 0.7;
pub const DOCUMENT_SIMILARITY_FLOOR: f32 = 0.2;
/// Fields shorter than this are treated as unfilled by contextual correction.
pub const MIN_FIELD_CHARS: usize = 3;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Failed to write context memory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize context memory: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub timestamp: DateTime<Utc>,
    pub text_fragment: String,
    pub metadata: FieldMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub original: String,
    pub corrected: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub timestamp: DateTime<Utc>,
    pub text_fragment: String,
    pub changed_fields: BTreeMap<MetadataField, FieldChange>,
}

#[derive(Debug, Clone)]
pub struct SimilarDocument {
    pub document: DocumentEntry,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    documents: Vec<DocumentEntry>,
    #[serde(default)]
    corrections: Vec<CorrectionEntry>,
}

struct MemoryState {
    path: Option<PathBuf>,
    data: MemoryFile,
}

impl MemoryState {
    fn trim(&mut self) {
        let docs = &mut self.data.documents;
        if docs.len() > MAX_DOCUMENTS {
            docs.drain(..docs.len() - MAX_DOCUMENTS);
        }
        let corrections = &mut self.data.corrections;
        if corrections.len() > MAX_CORRECTIONS {
            corrections.drain(..corrections.len() - MAX_CORRECTIONS);
        }
    }

    async fn save(&mut self) -> Result<(), MemoryError> {
        self.trim();
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(&self.data)?;
        tokio::fs::write(path, json).await.map_err(|source| MemoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(
            "Saved context memory: {} documents, {} corrections",
            self.data.documents.len(),
            self.data.corrections.len()
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct ContextMemory {
    state: Arc<Mutex<MemoryState>>,
    embedder: Arc<dyn Embedder>,
    metric: FuzzyMetric,
}

impl ContextMemory {
    /// Memory that never touches disk.
    pub fn in_memory() -> Self {
        Self::with_state(None, MemoryFile::default())
    }

    /// Loads `path`. A missing file is an empty memory; an unreadable one is
    /// logged and also treated as empty.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<MemoryFile>(&raw) {
                Ok(data) => {
                    info!(
                        "Loaded context memory: {} documents and {} corrections",
                        data.documents.len(),
                        data.corrections.len()
                    );
                    data
                }
                Err(e) => {
                    error!("Context memory {} is not valid JSON: {}", path.display(), e);
                    MemoryFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemoryFile::default(),
            Err(e) => {
                error!("Failed to read context memory {}: {}", path.display(), e);
                MemoryFile::default()
            }
        };
        Self::with_state(Some(path), data)
    }

    fn with_state(path: Option<PathBuf>, data: MemoryFile) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState { path, data })),
            embedder: Arc::new(HashingEmbedder::default()),
            metric: FuzzyMetric::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_metric(mut self, metric: FuzzyMetric) -> Self {
        self.metric = metric;
        self
    }

    pub async fn document_count(&self) -> usize {
        self.state.lock().await.data.documents.len()
    }

    pub async fn correction_count(&self) -> usize {
        self.state.lock().await.data.corrections.len()
    }

    pub async fn add_document(&self, text_fragment: &str, metadata: &FieldMap) -> Result<(), MemoryError> {
        let mut state = self.state.lock().await;
        state.data.documents.push(DocumentEntry {
            timestamp: Utc::now(),
            text_fragment: truncate_chars(text_fragment, DOCUMENT_FRAGMENT_CHARS).to_string(),
            metadata: metadata.clone(),
        });
        state.save().await
    }

    /// Records the fields a user changed. Returns `false` when nothing differs.
    pub async fn add_correction(
        &self,
        original: &FieldMap,
        corrected: &FieldMap,
        text_fragment: &str,
    ) -> Result<bool, MemoryError> {
        let changed_fields: BTreeMap<MetadataField, FieldChange> = corrected
            .iter()
            .filter_map(|(field, new_value)| {
                let old_value = original.get(field)?;
                let differs = old_value != new_value;
                let meaningful = !old_value.is_empty() || !new_value.is_empty();
                (differs && meaningful).then(|| {
                    (
                        *field,
                        FieldChange {
                            original: old_value.clone(),
                            corrected: new_value.clone(),
                        },
                    )
                })
            })
            .collect();

        if changed_fields.is_empty() {
            return Ok(false);
        }

        let fields: Vec<&str> = changed_fields.keys().map(MetadataField::as_str).collect();
        info!("Recorded user correction for fields: {}", fields.join(", "));

        let mut state = self.state.lock().await;
        state.data.corrections.push(CorrectionEntry {
            timestamp: Utc::now(),
            text_fragment: truncate_chars(text_fragment, CORRECTION_FRAGMENT_CHARS).to_string(),
            changed_fields,
        });
        state.save().await?;
        Ok(true)
    }

    /// Stored documents ranked by embedding similarity to `text`, best first,
    /// at most `top_n`, all scoring above the similarity floor.
    pub async fn find_similar_documents(&self, text: &str, top_n: usize) -> Vec<SimilarDocument> {
        let state = self.state.lock().await;
        let documents = &state.data.documents;
        if documents.is_empty() || top_n == 0 {
            return Vec::new();
        }

        let mut batch: Vec<&str> = documents.iter().map(|d| d.text_fragment.as_str()).collect();
        batch.push(truncate_chars(text, DOCUMENT_FRAGMENT_CHARS));
        let embeddings = self.embedder.embed_batch(&batch);

        let Some((query, stored)) = embeddings.split_last() else {
            return Vec::new();
        };

        let mut ranked: Vec<(usize, f32)> = stored
            .iter()
            .enumerate()
            .map(|(i, vector)| (i, cosine_similarity(query, vector)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        ranked
            .into_iter()
            .take(top_n)
            .filter(|(_, similarity)| *similarity > DOCUMENT_SIMILARITY_FLOOR)
            .map(|(i, similarity)| SimilarDocument {
                document: documents[i].clone(),
                similarity,
            })
            .collect()
    }

    /// Corrected value for `field` from the stored correction whose fragment
    /// best matches `text`, if that match clears the threshold.
    pub async fn find_relevant_corrections(&self, text: &str, field: MetadataField) -> Option<String> {
        let state = self.state.lock().await;

        let mut best: Option<(&CorrectionEntry, f64)> = None;
        for correction in state
            .data
            .corrections
            .iter()
            .filter(|c| c.changed_fields.contains_key(&field))
        {
            let score = self.metric.similarity(&correction.text_fragment, text);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((correction, score));
            }
        }

        let (correction, score) = best?;
        if score < CORRECTION_SIMILARITY_THRESHOLD {
            debug!("Best correction for {} scored {:.2}, below threshold", field, score);
            return None;
        }
        correction
            .changed_fields
            .get(&field)
            .map(|change| change.corrected.clone())
    }

    /// Fills empty or too-short fields from matching past corrections.
    /// Returns the number of fields changed.
    pub async fn apply_contextual_corrections(&self, record: &mut MetadataRecord, text: &str) -> usize {
        let mut applied = 0;
        for field in MetadataField::ALL {
            if record.get(field).trim().chars().count() >= MIN_FIELD_CHARS {
                continue;
            }
            if let Some(suggestion) = self.find_relevant_corrections(text, field).await {
                if suggestion.trim().is_empty() {
                    continue;
                }
                info!("Applied suggestion from correction history for {}: {}", field, suggestion);
                record.set(field, suggestion);
                applied += 1;
            }
        }
        applied
    }

    pub async fn flush(&self) -> Result<(), MemoryError> {
        let mut state = self.state.lock().await;
        state.save().await.map_err(|e| {
            warn!("Context memory flush failed: {}", e);
            e
        })
    }
}

#[cfg(test)]
mod tests;
