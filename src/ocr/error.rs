use std::time::Duration;
use thiserror::Error;

/// Failures of a single document's recognition. The pool turns every one of
/// these into a diagnostic [`crate::models::OcrResult`]; none aborts a batch.
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("tesseract executable not found (set TESSERACT_FOLDER or add it to PATH)")]
    TesseractNotInstalled,

    #[error("poppler tool {tool} not found (set POPPLER_FOLDER or add it to PATH)")]
    PopplerNotInstalled { tool: String },

    #[error("no tesseract language data for '{lang}' (install tesseract-ocr-{lang})")]
    LanguageDataNotFound { lang: String },

    #[error("page image could not be decoded: {details}")]
    InvalidImageFormat { details: String },

    #[error("page rendering failed: {details}")]
    RenderFailed { details: String },

    #[error("recognition failed: {details}")]
    RecognitionFailed { details: String },

    #[error("PDF file is empty or corrupted: {path}")]
    EmptyDocument { path: String },

    #[error("timed out after {elapsed:?}")]
    OcrTimeout { elapsed: Duration },

    #[error("no read access to {path}")]
    PermissionDenied { path: String },

    #[error("tesseract could not start: {details}")]
    InitializationFailed { details: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OcrError {
    /// Worth retrying the same document with the same installation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OcrError::OcrTimeout { .. } | OcrError::RecognitionFailed { .. }
        )
    }

    /// Caused by the local tool installation rather than the document.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            OcrError::TesseractNotInstalled
                | OcrError::PopplerNotInstalled { .. }
                | OcrError::LanguageDataNotFound { .. }
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            OcrError::TesseractNotInstalled => "OCR_NOT_INSTALLED",
            OcrError::PopplerNotInstalled { .. } => "OCR_POPPLER_MISSING",
            OcrError::LanguageDataNotFound { .. } => "OCR_LANG_MISSING",
            OcrError::InvalidImageFormat { .. } => "OCR_INVALID_FORMAT",
            OcrError::RenderFailed { .. } => "OCR_RENDER_FAILED",
            OcrError::RecognitionFailed { .. } => "OCR_RECOGNITION_FAILED",
            OcrError::EmptyDocument { .. } => "OCR_EMPTY_DOCUMENT",
            OcrError::OcrTimeout { .. } => "OCR_TIMEOUT",
            OcrError::PermissionDenied { .. } => "OCR_PERMISSION_DENIED",
            OcrError::InitializationFailed { .. } => "OCR_INIT_FAILED",
            OcrError::Io(_) => "OCR_IO_ERROR",
        }
    }
}

impl From<image::ImageError> for OcrError {
    fn from(err: image::ImageError) -> Self {
        OcrError::InvalidImageFormat {
            details: err.to_string(),
        }
    }
}
