use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::metadata::MetadataRecord;

/// Status tag carried by every successfully recognized document.
pub const OCR_SUCCESS: &str = "success";

/// Status tag for a source document with no readable pages.
pub const OCR_EMPTY_DOCUMENT: &str = "error: PDF file is empty or corrupted";

/// Status tag for a file the batch stopped before reaching.
pub const OCR_NOT_PROCESSED: &str = "error: not processed (batch cancelled)";

/// Recognized text of one document plus a human-readable status.
///
/// Callers check [`OcrResult::is_success`] (the `success` sentinel) rather than
/// matching on structured error codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    pub status: String,
}

impl OcrResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: OCR_SUCCESS.to_string(),
        }
    }

    /// Engine failures embed the diagnostic in both fields so downstream
    /// extraction sees it in place of document text.
    pub fn engine_failure(error: impl Display) -> Self {
        let diagnostic = format!("OCR technical error: {}", error);
        Self {
            text: diagnostic.clone(),
            status: diagnostic,
        }
    }

    pub fn empty_document() -> Self {
        Self {
            text: String::new(),
            status: OCR_EMPTY_DOCUMENT.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OCR_SUCCESS
    }
}

/// One output row of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRow {
    pub original_name: String,
    /// 1-based position of the file within the batch.
    pub sequence_number: usize,
    /// Name under which the file was archived, the synthesized name when the
    /// copy was skipped, or empty when the file was never processed.
    pub new_name: String,
    pub archived: bool,
    pub ocr_status: String,
    pub metadata: MetadataRecord,
}

impl BatchRow {
    /// Row for a file left behind by a cancelled batch: nothing archived,
    /// every field flagged for attention.
    pub fn not_processed(original_name: String, sequence_number: usize) -> Self {
        let mut metadata = MetadataRecord::new();
        metadata.finalize(false);
        Self {
            original_name,
            sequence_number,
            new_name: String::new(),
            archived: false,
            ocr_status: OCR_NOT_PROCESSED.to_string(),
            metadata,
        }
    }
}
