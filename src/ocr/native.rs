use image::{DynamicImage, GrayImage};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tesseract::{PageSegMode, Tesseract};
use tracing::debug;

use crate::config::Config;
use crate::ocr::engine::{OcrEngine, RecognitionParams, TesseractCliEngine};
use crate::ocr::error::OcrError;

/// In-process libtesseract recognition. Page counting and rendering still go
/// through poppler.
pub struct NativeTesseractEngine {
    poppler: TesseractCliEngine,
    tessdata: Option<PathBuf>,
}

impl NativeTesseractEngine {
    pub fn from_config(config: &Config) -> Self {
        let tessdata = config
            .tesseract_folder
            .as_ref()
            .map(|dir| dir.join("tessdata"))
            .filter(|dir| dir.is_dir());
        Self {
            poppler: TesseractCliEngine::from_config(config),
            tessdata,
        }
    }
}

/// Indexed by tesseract's `--psm` number.
const SEGMENTATION_MODES: [PageSegMode; 14] = [
    PageSegMode::PsmOsdOnly,
    PageSegMode::PsmAutoOsd,
    PageSegMode::PsmAutoOnly,
    PageSegMode::PsmAuto,
    PageSegMode::PsmSingleColumn,
    PageSegMode::PsmSingleBlockVertText,
    PageSegMode::PsmSingleBlock,
    PageSegMode::PsmSingleLine,
    PageSegMode::PsmSingleWord,
    PageSegMode::PsmCircleWord,
    PageSegMode::PsmSingleChar,
    PageSegMode::PsmSparseText,
    PageSegMode::PsmSparseTextOsd,
    PageSegMode::PsmRawLine,
];

fn page_seg_mode(psm: u32) -> PageSegMode {
    SEGMENTATION_MODES
        .into_iter()
        .nth(psm as usize)
        .unwrap_or(PageSegMode::PsmAuto)
}

impl OcrEngine for NativeTesseractEngine {
    fn page_count(&self, path: &Path) -> Result<usize, OcrError> {
        self.poppler.page_count(path)
    }

    fn render_page(&self, path: &Path, page: usize, dpi: u32) -> Result<DynamicImage, OcrError> {
        self.poppler.render_page(path, page, dpi)
    }

    fn recognize(&self, page: &GrayImage, params: &RecognitionParams) -> Result<String, OcrError> {
        let workdir = TempDir::new()?;
        let image_path = workdir.path().join("page.png");
        page.save(&image_path)?;
        let image_path = image_path.to_string_lossy().to_string();

        let datapath = self.tessdata.as_ref().map(|p| p.to_string_lossy().to_string());
        let mut tesseract = Tesseract::new(datapath.as_deref(), Some(params.language.as_str()))
            .map_err(|e| OcrError::InitializationFailed { details: e.to_string() })?
            .set_image(&image_path)
            .map_err(|e| OcrError::InvalidImageFormat { details: e.to_string() })?;

        tesseract.set_page_seg_mode(page_seg_mode(params.psm));
        // The bound crate exposes no engine-mode setter after init.
        debug!("Native tesseract ignores OEM {}", params.oem);

        tesseract.get_text().map_err(|e| OcrError::RecognitionFailed {
            details: format!("libtesseract returned no text: {}", e),
        })
    }
}
