use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BLUR_KERNEL_SIZE: u32 = 3;
pub const DEFAULT_THRESHOLD_BLOCK_SIZE: u32 = 11;
pub const DEFAULT_THRESHOLD_C: i32 = 2;

#[derive(Clone, Debug)]
pub struct Config {
    pub ocr_language: String,
    pub ocr_psm: u32,
    pub ocr_oem: u32,
    pub ocr_dpi: u32,
    pub ocr_workers: usize,
    pub ocr_timeout_seconds: u64,
    pub blur_kernel_size: u32,
    pub adaptive_threshold_block_size: u32,
    pub adaptive_threshold_c: i32,
    pub tesseract_folder: Option<PathBuf>,
    pub poppler_folder: Option<PathBuf>,
    /// Directory of `<lang>.txt` word lists; OCR word correction is off without it.
    pub ocr_dictionary_dir: Option<PathBuf>,
    pub output_subdir: String,
    pub context_memory_file: PathBuf,
    pub counters_file: PathBuf,
    pub entity_model_path: Option<PathBuf>,
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub embedding_model_dir: Option<PathBuf>,
    pub llm_enabled: bool,
    pub llm_endpoint: String,
    pub llm_model: String,
    pub llm_prompt_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            ocr_language: env::var("OCR_LANGUAGE")
                .unwrap_or_else(|_| "pol".to_string()),
            ocr_psm: parse_var("OCR_PSM").unwrap_or(3),
            ocr_oem: parse_var("OCR_OEM").unwrap_or(3),
            ocr_dpi: parse_var("OCR_DPI").unwrap_or(300),
            ocr_workers: parse_var("OCR_WORKERS").unwrap_or(0),
            ocr_timeout_seconds: parse_var("OCR_TIMEOUT_SECONDS").unwrap_or(300),
            blur_kernel_size: parse_var::<i64>("BLUR_KERNEL_SIZE")
                .map(|v| coerce_odd(v, DEFAULT_BLUR_KERNEL_SIZE))
                .unwrap_or(DEFAULT_BLUR_KERNEL_SIZE),
            adaptive_threshold_block_size: parse_var::<i64>("ADAPTIVE_THRESHOLD_BLOCK_SIZE")
                .map(|v| coerce_odd(v, DEFAULT_THRESHOLD_BLOCK_SIZE))
                .unwrap_or(DEFAULT_THRESHOLD_BLOCK_SIZE),
            adaptive_threshold_c: parse_var("ADAPTIVE_THRESHOLD_C").unwrap_or(DEFAULT_THRESHOLD_C),
            tesseract_folder: path_var("TESSERACT_FOLDER"),
            poppler_folder: path_var("POPPLER_FOLDER"),
            ocr_dictionary_dir: path_var("OCR_DICTIONARY_DIR"),
            output_subdir: env::var("OUTPUT_SUBDIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "archived".to_string()),
            context_memory_file: path_var("CONTEXT_MEMORY_FILE")
                .unwrap_or_else(|| PathBuf::from("document_context_memory.json")),
            counters_file: path_var("COUNTERS_FILE")
                .unwrap_or_else(|| PathBuf::from("counters.json")),
            entity_model_path: path_var("ENTITY_MODEL_PATH"),
            embedding_model_dir: path_var("EMBEDDING_MODEL_DIR"),
            llm_enabled: env::var("LLM_ENABLED")
                .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
            llm_endpoint: env::var("LLM_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            llm_model: env::var("LLM_MODEL")
                .unwrap_or_else(|_| "phi3:mini".to_string()),
            llm_prompt_file: path_var("LLM_PROMPT_FILE"),
        })
    }

    pub fn preprocess_settings(&self) -> PreprocessSettings {
        PreprocessSettings::new(
            i64::from(self.blur_kernel_size),
            i64::from(self.adaptive_threshold_block_size),
            self.adaptive_threshold_c,
        )
    }

    pub fn ocr_settings(&self) -> OcrSettings {
        OcrSettings {
            language: self.ocr_language.clone(),
            psm: self.ocr_psm,
            oem: self.ocr_oem,
            dpi: self.ocr_dpi,
            workers: self.ocr_workers,
            timeout: Duration::from_secs(self.ocr_timeout_seconds),
            preprocess: self.preprocess_settings(),
            dictionary_dir: self.ocr_dictionary_dir.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ocr_language: "pol".to_string(),
            ocr_psm: 3,
            ocr_oem: 3,
            ocr_dpi: 300,
            ocr_workers: 0,
            ocr_timeout_seconds: 300,
            blur_kernel_size: DEFAULT_BLUR_KERNEL_SIZE,
            adaptive_threshold_block_size: DEFAULT_THRESHOLD_BLOCK_SIZE,
            adaptive_threshold_c: DEFAULT_THRESHOLD_C,
            tesseract_folder: None,
            poppler_folder: None,
            ocr_dictionary_dir: None,
            output_subdir: "archived".to_string(),
            context_memory_file: PathBuf::from("document_context_memory.json"),
            counters_file: PathBuf::from("counters.json"),
            entity_model_path: None,
            embedding_model_dir: None,
            llm_enabled: false,
            llm_endpoint: "http://localhost:11434".to_string(),
            llm_model: "phi3:mini".to_string(),
            llm_prompt_file: None,
        }
    }
}

/// Per-page image normalization parameters. Sizes are always odd and at least 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreprocessSettings {
    pub blur_kernel_size: u32,
    pub threshold_block_size: u32,
    pub threshold_c: i32,
}

impl PreprocessSettings {
    pub fn new(blur_kernel_size: i64, threshold_block_size: i64, threshold_c: i32) -> Self {
        Self {
            blur_kernel_size: coerce_odd(blur_kernel_size, DEFAULT_BLUR_KERNEL_SIZE),
            threshold_block_size: coerce_odd(threshold_block_size, DEFAULT_THRESHOLD_BLOCK_SIZE),
            threshold_c,
        }
    }
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            blur_kernel_size: DEFAULT_BLUR_KERNEL_SIZE,
            threshold_block_size: DEFAULT_THRESHOLD_BLOCK_SIZE,
            threshold_c: DEFAULT_THRESHOLD_C,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OcrSettings {
    /// Tesseract language code, `pol+eng` style combination, or `auto`.
    pub language: String,
    pub psm: u32,
    pub oem: u32,
    pub dpi: u32,
    /// 0 means one worker per CPU core.
    pub workers: usize,
    pub timeout: Duration,
    pub preprocess: PreprocessSettings,
    pub dictionary_dir: Option<PathBuf>,
}

impl OcrSettings {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for OcrSettings {
    fn default() -> Self {
        Config::default().ocr_settings()
    }
}

/// Clamp a window size to an odd value of at least 3.
///
/// Values of 1 or less fall back to `default` (itself made odd), even values
/// move up to the next odd number.
pub fn coerce_odd(value: i64, default: u32) -> u32 {
    let fallback = if default > 1 { default | 1 } else { 3 };
    if value <= 1 {
        return fallback;
    }
    let value = u32::try_from(value).unwrap_or(fallback);
    if value % 2 == 0 {
        value.saturating_add(1)
    } else {
        value
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn path_var(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}
