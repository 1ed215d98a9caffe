pub mod engine;
pub mod error;
pub mod health;
pub mod language;
#[cfg(feature = "ocr")]
pub mod native;
pub mod pool;
pub mod preprocess;
pub mod progress;
pub mod tests;

use std::sync::Arc;

use crate::config::Config;
use crate::ocr::engine::OcrEngine;

pub use crate::ocr::engine::RecognitionParams;
pub use crate::ocr::error::OcrError;
pub use crate::ocr::pool::{BatchOcrOutcome, OcrWorkerPool};
pub use crate::ocr::progress::{ProgressAggregator, ProgressEvent, ProgressSink, ProgressSnapshot};

/// Picks the recognition backend for this build.
pub fn default_engine(config: &Config) -> Arc<dyn OcrEngine> {
    #[cfg(feature = "ocr")]
    {
        Arc::new(crate::ocr::native::NativeTesseractEngine::from_config(config))
    }

    #[cfg(not(feature = "ocr"))]
    {
        Arc::new(crate::ocr::engine::TesseractCliEngine::from_config(config))
    }
}
