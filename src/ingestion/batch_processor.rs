use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::context_memory::{ContextMemory, MemoryError};
use crate::metadata_extraction::{GenerativeStage, MetadataExtractor};
use crate::models::{BatchRow, FieldMap};
use crate::ocr::engine::OcrEngine;
use crate::ocr::{OcrWorkerPool, ProgressSink};
use crate::services::counter_service::CounterStore;
use crate::services::file_service::{archive_copy, fallback_filename, prepare_output_dir, synthesize_filename};

/// Per-run options of [`BatchProcessor::process_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Defaults to `<input_dir>/<OUTPUT_SUBDIR>`.
    pub output_dir: Option<PathBuf>,
    pub mode: String,
    pub case_signature: String,
}

/// Top-level pipeline: parallel OCR for the whole batch, then metadata
/// extraction, naming and archiving one file at a time in input order.
pub struct BatchProcessor {
    pool: OcrWorkerPool,
    extractor: MetadataExtractor,
    counters: CounterStore,
    output_subdir: String,
}

impl BatchProcessor {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        extractor: MetadataExtractor,
        counters: CounterStore,
        config: &Config,
    ) -> Self {
        Self {
            pool: OcrWorkerPool::new(engine, config.ocr_settings()),
            extractor,
            counters,
            output_subdir: config.output_subdir.clone(),
        }
    }

    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    pub fn memory(&self) -> &ContextMemory {
        self.extractor.memory()
    }

    /// PDF files directly inside `input_dir`, sorted by name.
    pub fn collect_pdfs(input_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(input_dir).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("Failed to read {}", input_dir.display()))?;
            let is_pdf = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
            if entry.file_type().is_file() && is_pdf {
                paths.push(entry.into_path());
            }
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(paths)
    }

    /// Processes every PDF in `input_dir`. Per-file problems end up in the row
    /// (status, colors, fallback name) and never fail the batch; only a
    /// missing input directory or an uncreatable output directory does.
    /// Every PDF yields exactly one row; files the batch stopped before
    /// reaching are reported as not processed and are neither named nor
    /// archived.
    pub async fn process_batch(
        &self,
        input_dir: &Path,
        options: &BatchOptions,
        generative: Option<&GenerativeStage>,
        cancel: &CancellationToken,
        progress: Option<ProgressSink>,
    ) -> Result<Vec<BatchRow>> {
        let paths = Self::collect_pdfs(input_dir)?;
        if paths.is_empty() {
            info!("No PDF files found in {}", input_dir.display());
            return Ok(Vec::new());
        }

        let output_dir = options
            .output_dir
            .clone()
            .unwrap_or_else(|| input_dir.join(&self.output_subdir));
        prepare_output_dir(&output_dir)
            .await
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let outcome = self.pool.extract(&paths, cancel, progress).await;
        info!(
            "OCR finished for {} of {} files ({} pages)",
            outcome.processed(),
            paths.len(),
            outcome.total_pages
        );

        let mut rows = Vec::with_capacity(paths.len());
        let mut skipped = 0usize;
        for (index, (path, result)) in paths.iter().zip(outcome.results).enumerate() {
            let sequence_number = index + 1;
            let original_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let result = match result {
                Some(result) if !cancel.is_cancelled() => result,
                _ => {
                    skipped += 1;
                    rows.push(BatchRow::not_processed(original_name, sequence_number));
                    continue;
                }
            };
            if !result.is_success() {
                warn!("{}: {}", original_name, result.status);
            }

            let metadata = self
                .extractor
                .extract_info(
                    &result.text,
                    &original_name,
                    &options.mode,
                    &options.case_signature,
                    generative,
                )
                .await;

            let synthesized = synthesize_filename(&metadata, &options.mode, &self.counters).unwrap_or_else(|e| {
                warn!("Could not name {}: {}", original_name, e);
                fallback_filename(sequence_number as u64)
            });

            let archived = archive_copy(path, &output_dir, &synthesized).await;
            rows.push(BatchRow {
                original_name,
                sequence_number,
                archived: archived.is_some(),
                new_name: archived.unwrap_or(synthesized),
                ocr_status: result.status,
                metadata,
            });
        }

        if skipped > 0 {
            info!("Batch cancelled: {} of {} files not processed", skipped, paths.len());
        }
        info!("Batch complete: {} rows, archive {}", rows.len(), output_dir.display());
        Ok(rows)
    }

    /// Stores a user's edit of a row's metadata for future runs.
    pub async fn record_correction(
        &self,
        original: &FieldMap,
        corrected: &FieldMap,
        text: &str,
    ) -> Result<bool, MemoryError> {
        self.memory().add_correction(original, corrected, text).await
    }
}
