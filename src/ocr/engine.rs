//! External OCR engine seam.
//!
//! The pool drives an [`OcrEngine`] page by page from blocking worker threads.
//! [`TesseractCliEngine`] shells out to poppler and tesseract; the native
//! libtesseract engine lives behind the `ocr` feature.

use image::{DynamicImage, GrayImage};
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;
use tracing::debug;

use crate::config::{Config, OcrSettings};
use crate::ocr::error::OcrError;
use crate::ocr::health::tool_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionParams {
    pub language: String,
    pub psm: u32,
    pub oem: u32,
}

impl RecognitionParams {
    pub fn with_language(&self, language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..self.clone()
        }
    }
}

impl From<&OcrSettings> for RecognitionParams {
    fn from(settings: &OcrSettings) -> Self {
        Self {
            language: settings.language.clone(),
            psm: settings.psm,
            oem: settings.oem,
        }
    }
}

pub trait OcrEngine: Send + Sync {
    /// Number of pages in a paginated document.
    fn page_count(&self, path: &Path) -> Result<usize, OcrError>;

    /// Rasterize one page (1-based) at the given resolution.
    fn render_page(&self, path: &Path, page: usize, dpi: u32) -> Result<DynamicImage, OcrError>;

    fn recognize(&self, page: &GrayImage, params: &RecognitionParams) -> Result<String, OcrError>;
}

/// Rejects files that are empty or do not carry a PDF signature.
pub fn ensure_pdf(path: &Path) -> Result<(), OcrError> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => OcrError::PermissionDenied {
            path: path.display().to_string(),
        },
        _ => OcrError::Io(e),
    })?;
    if metadata.len() == 0 {
        return Err(OcrError::EmptyDocument {
            path: path.display().to_string(),
        });
    }

    match infer::get_from_path(path)? {
        Some(kind) if kind.mime_type() == "application/pdf" => Ok(()),
        _ => Err(OcrError::EmptyDocument {
            path: path.display().to_string(),
        }),
    }
}

/// Reads the `Pages:` line of `pdfinfo` output.
pub fn parse_pdfinfo_pages(stdout: &str) -> Option<usize> {
    stdout
        .lines()
        .find(|line| line.starts_with("Pages:"))
        .and_then(|line| line.trim_start_matches("Pages:").trim().parse().ok())
}

#[derive(Debug, Clone, Default)]
pub struct TesseractCliEngine {
    tesseract_folder: Option<PathBuf>,
    poppler_folder: Option<PathBuf>,
}

impl TesseractCliEngine {
    pub fn new(tesseract_folder: Option<PathBuf>, poppler_folder: Option<PathBuf>) -> Self {
        Self {
            tesseract_folder,
            poppler_folder,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tesseract_folder.clone(), config.poppler_folder.clone())
    }

    fn run_poppler(&self, tool: &str, args: &[&OsStr]) -> Result<Output, OcrError> {
        Command::new(tool_path(self.poppler_folder.as_deref(), tool))
            .args(args)
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => OcrError::PopplerNotInstalled {
                    tool: tool.to_string(),
                },
                _ => OcrError::Io(e),
            })
    }
}

impl OcrEngine for TesseractCliEngine {
    fn page_count(&self, path: &Path) -> Result<usize, OcrError> {
        ensure_pdf(path)?;
        let output = self.run_poppler("pdfinfo", &[path.as_os_str()])?;

        if !output.status.success() {
            debug!(
                "pdfinfo failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(OcrError::EmptyDocument {
                path: path.display().to_string(),
            });
        }

        Ok(parse_pdfinfo_pages(&String::from_utf8_lossy(&output.stdout)).unwrap_or(0))
    }

    fn render_page(&self, path: &Path, page: usize, dpi: u32) -> Result<DynamicImage, OcrError> {
        let workdir = TempDir::new()?;
        let prefix = workdir.path().join("page");
        let page_arg = page.to_string();
        let dpi_arg = dpi.to_string();

        let output = self.run_poppler(
            "pdftoppm",
            &[
                OsStr::new("-png"),
                OsStr::new("-r"),
                OsStr::new(&dpi_arg),
                OsStr::new("-f"),
                OsStr::new(&page_arg),
                OsStr::new("-l"),
                OsStr::new(&page_arg),
                OsStr::new("-singlefile"),
                path.as_os_str(),
                prefix.as_os_str(),
            ],
        )?;

        if !output.status.success() {
            return Err(OcrError::RenderFailed {
                details: format!(
                    "pdftoppm exited with {} on page {}: {}",
                    output.status,
                    page,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(image::open(prefix.with_extension("png"))?)
    }

    fn recognize(&self, page: &GrayImage, params: &RecognitionParams) -> Result<String, OcrError> {
        let workdir = TempDir::new()?;
        let image_path = workdir.path().join("page.png");
        page.save(&image_path)?;

        let output = Command::new(tool_path(self.tesseract_folder.as_deref(), "tesseract"))
            .arg(&image_path)
            .arg("stdout")
            .args(["-l", &params.language])
            .args(["--psm", &params.psm.to_string()])
            .args(["--oem", &params.oem.to_string()])
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => OcrError::TesseractNotInstalled,
                _ => OcrError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Failed loading language") {
                return Err(OcrError::LanguageDataNotFound {
                    lang: params.language.clone(),
                });
            }
            return Err(OcrError::RecognitionFailed {
                details: format!("tesseract failed: {}", stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_pdfinfo_pages() {
        let stdout = "Title:          scan\nProducer:       scanner\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_pdfinfo_pages(stdout), Some(12));
        assert_eq!(parse_pdfinfo_pages("Title: x\n"), None);
    }

    #[test]
    fn test_ensure_pdf_rejects_empty_and_foreign_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();

        let empty = temp_dir.path().join("empty.pdf");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(ensure_pdf(&empty), Err(OcrError::EmptyDocument { .. })));

        let text = temp_dir.path().join("notes.pdf");
        fs::write(&text, b"just some text pretending to be a pdf").unwrap();
        assert!(matches!(ensure_pdf(&text), Err(OcrError::EmptyDocument { .. })));

        let pdf = temp_dir.path().join("real.pdf");
        fs::write(&pdf, b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<<>>\nendobj\n").unwrap();
        assert!(ensure_pdf(&pdf).is_ok());
    }

    #[test]
    fn test_recognition_params_with_language() {
        let params = RecognitionParams {
            language: "pol+eng".to_string(),
            psm: 6,
            oem: 1,
        };
        let fixed = params.with_language("eng");
        assert_eq!(fixed.language, "eng");
        assert_eq!(fixed.psm, 6);
        assert_eq!(fixed.oem, 1);
    }
}
