use crate::ocr::error::OcrError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Resolves an external tool inside an optional install folder, falling back to `PATH`.
pub fn tool_path(folder: Option<&Path>, name: &str) -> PathBuf {
    match folder {
        Some(dir) => {
            let exe = if cfg!(windows) { format!("{}.exe", name) } else { name.to_string() };
            let candidate = dir.join(&exe);
            if candidate.exists() {
                return candidate;
            }
            let nested = dir.join("bin").join(&exe);
            if nested.exists() {
                return nested;
            }
            PathBuf::from(name)
        }
        None => PathBuf::from(name),
    }
}

/// What the `doctor` command reports about the local OCR installation.
#[derive(Debug, Clone)]
pub struct OcrDiagnostics {
    pub tesseract_version: Option<String>,
    pub poppler_version: Option<String>,
    pub available_languages: Vec<String>,
}

impl fmt::Display for OcrDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let missing = "missing";
        writeln!(f, "tesseract: {}", self.tesseract_version.as_deref().unwrap_or(missing))?;
        writeln!(f, "poppler:   {}", self.poppler_version.as_deref().unwrap_or(missing))?;
        if self.available_languages.is_empty() {
            write!(f, "languages: none")
        } else {
            write!(f, "languages: {}", self.available_languages.join(" "))
        }
    }
}

/// First non-blank line of a tool banner.
fn banner_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unknown version")
        .to_string()
}

/// Checks the external OCR tools configured by `TESSERACT_FOLDER` and
/// `POPPLER_FOLDER`.
#[derive(Debug, Clone, Default)]
pub struct OcrHealthChecker {
    tesseract_folder: Option<PathBuf>,
    poppler_folder: Option<PathBuf>,
}

impl OcrHealthChecker {
    pub fn new(tesseract_folder: Option<PathBuf>, poppler_folder: Option<PathBuf>) -> Self {
        Self {
            tesseract_folder,
            poppler_folder,
        }
    }

    fn run_tesseract(&self, arg: &str) -> Result<Output, OcrError> {
        let output = Command::new(tool_path(self.tesseract_folder.as_deref(), "tesseract"))
            .arg(arg)
            .output()
            .map_err(|_| OcrError::TesseractNotInstalled)?;
        if !output.status.success() {
            return Err(OcrError::TesseractNotInstalled);
        }
        Ok(output)
    }

    pub fn check_tesseract_installation(&self) -> Result<String, OcrError> {
        let output = self.run_tesseract("--version")?;
        Ok(banner_line(&output.stdout))
    }

    /// `pdfinfo -v` writes its banner to stderr and older builds exit non-zero.
    pub fn check_poppler_installation(&self) -> Result<String, OcrError> {
        let output = Command::new(tool_path(self.poppler_folder.as_deref(), "pdfinfo"))
            .arg("-v")
            .output()
            .map_err(|_| OcrError::PopplerNotInstalled {
                tool: "pdfinfo".to_string(),
            })?;
        let banner = if output.stderr.is_empty() { &output.stdout } else { &output.stderr };
        Ok(banner_line(banner))
    }

    pub fn get_available_languages(&self) -> Result<Vec<String>, OcrError> {
        let output = self.run_tesseract("--list-langs")?;
        Ok(parse_language_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Checks a language or combination such as `pol+eng` against the
    /// installed traineddata files.
    pub fn validate_language_combination(&self, lang_combination: &str) -> Result<(), OcrError> {
        check_languages(lang_combination, &self.get_available_languages()?)
    }

    pub fn diagnostics(&self) -> OcrDiagnostics {
        OcrDiagnostics {
            tesseract_version: self.check_tesseract_installation().ok(),
            poppler_version: self.check_poppler_installation().ok(),
            available_languages: self.get_available_languages().unwrap_or_default(),
        }
    }
}

/// Skips the "List of available languages" header line.
pub fn parse_language_listing(listing: &str) -> Vec<String> {
    let mut languages: Vec<String> = listing
        .lines()
        .skip(1)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    languages.sort();
    languages
}

pub fn check_languages(lang_combination: &str, available: &[String]) -> Result<(), OcrError> {
    if lang_combination.trim().is_empty() {
        return Err(OcrError::LanguageDataNotFound {
            lang: "empty".to_string(),
        });
    }

    for lang in lang_combination.split('+').map(str::trim) {
        if !available.iter().any(|a| a == lang) {
            return Err(OcrError::LanguageDataNotFound {
                lang: lang.to_string(),
            });
        }
    }
    Ok(())
}
