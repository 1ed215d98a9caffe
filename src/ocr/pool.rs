use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OcrSettings;
use crate::models::OcrResult;
use crate::ocr::engine::{OcrEngine, RecognitionParams};
use crate::ocr::error::OcrError;
use crate::ocr::language::{detect_language, DictionaryCorrector, AUTO_LANGUAGE, PRELIMINARY_PROFILE};
use crate::ocr::preprocess::preprocess_page;
use crate::ocr::progress::{ProgressEvent, ProgressSink};

/// Result of one pool run. `results[i]` belongs to `paths[i]`; `None` means the
/// file was never started because the batch was cancelled.
#[derive(Debug, Clone, Default)]
pub struct BatchOcrOutcome {
    pub results: Vec<Option<OcrResult>>,
    pub total_pages: usize,
}

impl BatchOcrOutcome {
    pub fn processed(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }
}

/// Page count read for one file before dispatch.
#[derive(Debug, Clone)]
enum PageCount {
    Pages(usize),
    Empty,
    Failed(String),
}

impl PageCount {
    fn pages(&self) -> usize {
        match self {
            PageCount::Pages(n) => *n,
            _ => 0,
        }
    }
}

/// File-granular parallel OCR. Pages inside one file run sequentially.
#[derive(Clone)]
pub struct OcrWorkerPool {
    engine: Arc<dyn OcrEngine>,
    settings: OcrSettings,
}

impl OcrWorkerPool {
    pub fn new(engine: Arc<dyn OcrEngine>, settings: OcrSettings) -> Self {
        Self { engine, settings }
    }

    pub fn settings(&self) -> &OcrSettings {
        &self.settings
    }

    /// Runs the batch with the language and modes from the pool settings.
    pub async fn extract(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
        progress: Option<ProgressSink>,
    ) -> BatchOcrOutcome {
        let params = RecognitionParams::from(&self.settings);
        self.extract_batch(paths, cancel, progress, &params).await
    }

    pub async fn extract_batch(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
        progress: Option<ProgressSink>,
        params: &RecognitionParams,
    ) -> BatchOcrOutcome {
        let counts = self.count_pages(paths).await;
        let total_pages = counts.iter().map(PageCount::pages).sum();
        let correctors = Arc::new(self.load_correctors(&params.language).await);

        if let Some(sink) = &progress {
            let _ = sink.send(ProgressEvent::TotalPages { pages: total_pages });
        }

        let workers = self.settings.effective_workers();
        info!(
            "Starting OCR of {} files ({} pages) with {} workers, language '{}'",
            paths.len(),
            total_pages,
            workers,
            params.language
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles: Vec<(usize, JoinHandle<OcrResult>)> = Vec::with_capacity(paths.len());

        for (index, (path, count)) in paths.iter().zip(counts).enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                break;
            };
            if cancel.is_cancelled() {
                break;
            }

            let engine = self.engine.clone();
            let settings = self.settings.clone();
            let params = params.clone();
            let path = path.clone();
            let sink = progress.clone();
            let correctors = correctors.clone();

            handles.push((
                index,
                tokio::spawn(async move {
                    let job = FileJob {
                        path,
                        count,
                        params,
                        correctors,
                        sink,
                    };
                    run_with_deadline(engine, settings, job, permit).await
                }),
            ));
        }

        if cancel.is_cancelled() {
            info!(
                "OCR batch cancelled: {} of {} files dispatched",
                handles.len(),
                paths.len()
            );
        }

        let mut results: Vec<Option<OcrResult>> = vec![None; paths.len()];
        for (index, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("OCR task for {} failed to complete: {}", paths[index].display(), e);
                    OcrResult::engine_failure(format!("worker task failed: {}", e))
                }
            };
            results[index] = Some(result);
        }

        BatchOcrOutcome { results, total_pages }
    }

    /// Word lists for every language the batch can recognize in, keyed by
    /// tesseract code. Empty unless a dictionary directory is configured.
    async fn load_correctors(&self, language: &str) -> HashMap<String, DictionaryCorrector> {
        let Some(dir) = self.settings.dictionary_dir.clone() else {
            return HashMap::new();
        };
        let languages: Vec<String> = if language == AUTO_LANGUAGE {
            vec!["pol".to_string(), "eng".to_string()]
        } else {
            vec![language.to_string()]
        };

        let loaded = tokio::task::spawn_blocking(move || {
            let mut correctors = HashMap::new();
            for language in languages {
                match DictionaryCorrector::load(&dir, &language) {
                    Ok(corrector) if !corrector.is_empty() => {
                        correctors.insert(language, corrector);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Word list for '{}' not loaded: {}", language, e),
                }
            }
            correctors
        })
        .await;

        loaded.unwrap_or_else(|e| {
            error!("Loading word lists failed: {}", e);
            HashMap::new()
        })
    }

    /// Best-effort page counts; failures count as zero pages.
    async fn count_pages(&self, paths: &[PathBuf]) -> Vec<PageCount> {
        let counts = paths.iter().map(|path| {
            let engine = self.engine.clone();
            let path = path.clone();
            tokio::task::spawn_blocking(move || match engine.page_count(&path) {
                Ok(0) => PageCount::Empty,
                Ok(pages) => PageCount::Pages(pages),
                Err(OcrError::EmptyDocument { .. }) => PageCount::Empty,
                Err(e) => {
                    warn!("Page count failed for {}: {}", path.display(), e);
                    PageCount::Failed(e.to_string())
                }
            })
        });

        futures::future::join_all(counts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|e| PageCount::Failed(e.to_string())))
            .collect()
    }
}

/// Everything one worker needs to recognize a single file.
struct FileJob {
    path: PathBuf,
    count: PageCount,
    params: RecognitionParams,
    correctors: Arc<HashMap<String, DictionaryCorrector>>,
    sink: Option<ProgressSink>,
}

/// Recognizes one file under the configured deadline. On expiry the file's
/// token is cancelled so the blocking work stops at the next page boundary
/// without reporting further progress; the worker slot stays taken until it
/// does.
async fn run_with_deadline(
    engine: Arc<dyn OcrEngine>,
    settings: OcrSettings,
    job: FileJob,
    permit: OwnedSemaphorePermit,
) -> OcrResult {
    let deadline = settings.timeout;
    let file_name = job.path.display().to_string();
    let file_cancel = CancellationToken::new();
    let stop = file_cancel.clone();

    let work = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        recognize_document(engine.as_ref(), &job, &settings, &stop)
    });

    match timeout(deadline, work).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("OCR worker for {} panicked: {}", file_name, e);
            OcrResult::engine_failure(format!("worker task failed: {}", e))
        }
        Err(_) => {
            file_cancel.cancel();
            let err = OcrError::OcrTimeout { elapsed: deadline };
            warn!("OCR of {} exceeded its deadline: {}", file_name, err);
            OcrResult::engine_failure(err)
        }
    }
}

fn recognize_document(
    engine: &dyn OcrEngine,
    job: &FileJob,
    settings: &OcrSettings,
    stop: &CancellationToken,
) -> OcrResult {
    let path = job.path.as_path();
    let pages = match &job.count {
        PageCount::Pages(pages) => *pages,
        PageCount::Empty => {
            warn!("Skipping empty or corrupted PDF: {}", path.display());
            return OcrResult::empty_document();
        }
        PageCount::Failed(details) => return OcrResult::engine_failure(details),
    };

    match recognize_pages(engine, job, pages, settings, stop) {
        Ok(text) => {
            debug!("OCR finished for {}: {} pages", path.display(), pages);
            OcrResult::success(text)
        }
        Err(e @ OcrError::OcrTimeout { .. }) => {
            debug!("Abandoned {} after its deadline", path.display());
            OcrResult::engine_failure(e)
        }
        Err(e) => {
            warn!("OCR failed for {} [{}]: {}", path.display(), e.error_code(), e);
            OcrResult::engine_failure(e)
        }
    }
}

fn recognize_pages(
    engine: &dyn OcrEngine,
    job: &FileJob,
    pages: usize,
    settings: &OcrSettings,
    stop: &CancellationToken,
) -> Result<String, OcrError> {
    let path = job.path.as_path();
    let params = &job.params;
    let expired = || OcrError::OcrTimeout {
        elapsed: settings.timeout,
    };
    let mut page_texts = Vec::with_capacity(pages);

    for page in 1..=pages {
        if stop.is_cancelled() {
            return Err(expired());
        }
        let image = engine.render_page(path, page, settings.dpi)?;
        let prepared = preprocess_page(&image, &settings.preprocess);

        let (raw, language) = if params.language == AUTO_LANGUAGE {
            let preliminary = engine.recognize(&prepared, &params.with_language(PRELIMINARY_PROFILE))?;
            let detected = detect_language(&preliminary);
            debug!("Page {} of {} detected as '{}'", page, path.display(), detected);
            (engine.recognize(&prepared, &params.with_language(detected))?, detected)
        } else {
            (engine.recognize(&prepared, params)?, params.language.as_str())
        };

        let text = raw.trim_end();
        page_texts.push(match job.correctors.get(language) {
            Some(corrector) => corrector.correct_text(text),
            None => text.to_string(),
        });

        if stop.is_cancelled() {
            return Err(expired());
        }
        if let Some(sink) = &job.sink {
            let _ = sink.send(ProgressEvent::PageDone { increment: 1 });
        }
    }

    Ok(page_texts.join("\n"))
}
