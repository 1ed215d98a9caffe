#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::OcrSettings;
    use crate::models::{OCR_EMPTY_DOCUMENT, OCR_SUCCESS};
    use crate::ocr::engine::OcrEngine;
    use crate::ocr::health::{check_languages, parse_language_listing};
    use image::{DynamicImage, GrayImage, Luma};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Documents are keyed by file name. Rendered pages encode their page
    /// number in the image width so `recognize` can echo it back.
    #[derive(Default)]
    struct FakeEngine {
        pages: HashMap<String, usize>,
        broken: Vec<String>,
        slow: Vec<String>,
        renders: Mutex<Vec<String>>,
        cancel_on: Option<(String, CancellationToken)>,
        preliminary_text: String,
        languages: Mutex<Vec<String>>,
    }

    impl FakeEngine {
        fn with_pages(docs: &[(&str, usize)]) -> Self {
            Self {
                pages: docs.iter().map(|(n, p)| (n.to_string(), *p)).collect(),
                preliminary_text: "Umowa w sprawie dostawy".to_string(),
                ..Default::default()
            }
        }

        fn name(path: &Path) -> String {
            path.file_name().unwrap().to_string_lossy().to_string()
        }
    }

    impl OcrEngine for FakeEngine {
        fn page_count(&self, path: &Path) -> Result<usize, OcrError> {
            self.pages
                .get(&Self::name(path))
                .copied()
                .ok_or_else(|| OcrError::EmptyDocument { path: path.display().to_string() })
        }

        fn render_page(&self, path: &Path, page: usize, _dpi: u32) -> Result<DynamicImage, OcrError> {
            let name = Self::name(path);
            self.renders.lock().unwrap().push(name.clone());
            if let Some((target, token)) = &self.cancel_on {
                if *target == name {
                    token.cancel();
                }
            }
            if self.slow.contains(&name) {
                std::thread::sleep(Duration::from_millis(400));
            }
            if self.broken.contains(&name) {
                return Err(OcrError::RecognitionFailed {
                    details: "engine crashed".to_string(),
                });
            }
            let width = 10 + page as u32;
            Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(width, 8, Luma([255]))))
        }

        fn recognize(&self, page: &GrayImage, params: &RecognitionParams) -> Result<String, OcrError> {
            self.languages.lock().unwrap().push(params.language.clone());
            if params.language == "pol+eng" {
                return Ok(self.preliminary_text.clone());
            }
            Ok(format!("page {}\n", page.width() - 10))
        }
    }

    fn settings(workers: usize) -> OcrSettings {
        OcrSettings {
            language: "pol".to_string(),
            workers,
            timeout: Duration::from_secs(30),
            ..OcrSettings::default()
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/scans/{}", n))).collect()
    }

    #[test]
    fn test_ocr_error_types() {
        let err = OcrError::TesseractNotInstalled;
        assert_eq!(err.error_code(), "OCR_NOT_INSTALLED");
        assert!(!err.is_recoverable());
        assert!(err.is_configuration_error());

        let err = OcrError::OcrTimeout {
            elapsed: Duration::from_millis(50),
        };
        assert_eq!(err.to_string(), "timed out after 50ms");
        assert_eq!(err.error_code(), "OCR_TIMEOUT");
        assert!(err.is_recoverable());
        assert!(!err.is_configuration_error());

        let err = OcrError::LanguageDataNotFound { lang: "pol".to_string() };
        assert!(err.to_string().contains("tesseract-ocr-pol"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_diagnostics_report() {
        let report = crate::ocr::health::OcrDiagnostics {
            tesseract_version: Some("tesseract 5.3.0".to_string()),
            poppler_version: None,
            available_languages: vec!["eng".to_string(), "pol".to_string()],
        }
        .to_string();

        assert!(report.contains("tesseract: tesseract 5.3.0"));
        assert!(report.contains("poppler:   missing"));
        assert!(report.ends_with("languages: eng pol"));
    }

    #[test]
    fn test_language_listing_validation() {
        let listing = "List of available languages in \"/usr/share/tessdata/\" (3):\neng\npol\nosd\n";
        let langs = parse_language_listing(listing);
        assert_eq!(langs, vec!["eng", "osd", "pol"]);

        assert!(check_languages("pol+eng", &langs).is_ok());
        assert!(matches!(
            check_languages("pol+deu", &langs),
            Err(OcrError::LanguageDataNotFound { lang }) if lang == "deu"
        ));
        assert!(check_languages("", &langs).is_err());
    }

    #[tokio::test]
    async fn test_batch_results_align_with_inputs() {
        let engine = Arc::new(FakeEngine::with_pages(&[("a.pdf", 2), ("b.pdf", 1), ("c.pdf", 3)]));
        let pool = OcrWorkerPool::new(engine, settings(2));
        let (sink, aggregator) = ProgressAggregator::channel();

        let outcome = pool
            .extract(&paths(&["a.pdf", "b.pdf", "c.pdf"]), &CancellationToken::new(), Some(sink))
            .await;

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.total_pages, 6);
        let texts: Vec<&str> = outcome
            .results
            .iter()
            .map(|r| r.as_ref().unwrap().text.as_str())
            .collect();
        assert_eq!(texts, vec!["page 1\npage 2", "page 1", "page 1\npage 2\npage 3"]);
        assert!(outcome.results.iter().all(|r| r.as_ref().unwrap().status == OCR_SUCCESS));

        let progress = aggregator.finish().await;
        assert_eq!(progress, ProgressSnapshot { pages_done: 6, total_pages: 6 });
    }

    #[tokio::test]
    async fn test_engine_failure_is_isolated() {
        let mut engine = FakeEngine::with_pages(&[("1.pdf", 1), ("2.pdf", 2), ("3.pdf", 1)]);
        engine.broken.push("2.pdf".to_string());
        let pool = OcrWorkerPool::new(Arc::new(engine), settings(3));

        let outcome = pool
            .extract(&paths(&["1.pdf", "2.pdf", "3.pdf"]), &CancellationToken::new(), None)
            .await;

        assert_eq!(outcome.results.len(), 3);
        let failed = outcome.results[1].as_ref().unwrap();
        assert!(!failed.is_success());
        assert!(failed.status.contains("engine crashed"));
        assert_eq!(failed.text, failed.status);
        assert!(outcome.results[0].as_ref().unwrap().is_success());
        assert!(outcome.results[2].as_ref().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_cancel_before_start_leaves_all_slots_empty() {
        let engine = Arc::new(FakeEngine::with_pages(&[("a.pdf", 4), ("b.pdf", 5)]));
        let pool = OcrWorkerPool::new(engine, settings(2));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = pool.extract(&paths(&["a.pdf", "b.pdf", "missing.pdf"]), &cancel, None).await;

        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.results.iter().all(Option::is_none));
        assert_eq!(outcome.total_pages, 9);
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_finishes_in_flight_file() {
        let cancel = CancellationToken::new();
        let mut engine = FakeEngine::with_pages(&[("a.pdf", 2), ("b.pdf", 1), ("c.pdf", 1)]);
        engine.cancel_on = Some(("a.pdf".to_string(), cancel.clone()));
        let pool = OcrWorkerPool::new(Arc::new(engine), settings(1));

        let outcome = pool.extract(&paths(&["a.pdf", "b.pdf", "c.pdf"]), &cancel, None).await;

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.results[0].as_ref().unwrap().text, "page 1\npage 2");
        assert!(outcome.results[1].is_none());
        assert!(outcome.results[2].is_none());
        assert_eq!(outcome.processed(), 1);
    }

    #[tokio::test]
    async fn test_empty_document_gets_distinct_status() {
        let engine = Arc::new(FakeEngine::with_pages(&[("ok.pdf", 1), ("zero.pdf", 0)]));
        let pool = OcrWorkerPool::new(engine, settings(2));

        let outcome = pool
            .extract(&paths(&["ok.pdf", "zero.pdf", "broken.pdf"]), &CancellationToken::new(), None)
            .await;

        assert!(outcome.results[0].as_ref().unwrap().is_success());
        for slot in &outcome.results[1..] {
            let result = slot.as_ref().unwrap();
            assert_eq!(result.status, OCR_EMPTY_DOCUMENT);
            assert!(result.text.is_empty());
        }
        assert_eq!(outcome.total_pages, 1);
    }

    #[tokio::test]
    async fn test_auto_language_runs_preliminary_pass() {
        let mut engine = FakeEngine::with_pages(&[("letter.pdf", 1)]);
        engine.preliminary_text = "Dear Sir, this is the invoice for the work".to_string();
        let engine = Arc::new(engine);
        let pool = OcrWorkerPool::new(engine.clone(), settings(1));
        let params = RecognitionParams {
            language: "auto".to_string(),
            psm: 3,
            oem: 3,
        };

        let outcome = pool
            .extract_batch(&paths(&["letter.pdf"]), &CancellationToken::new(), None, &params)
            .await;

        assert!(outcome.results[0].as_ref().unwrap().is_success());
        let languages = engine.languages.lock().unwrap().clone();
        assert_eq!(languages, vec!["pol+eng".to_string(), "eng".to_string()]);
    }

    #[tokio::test]
    async fn test_file_deadline_produces_timeout_status() {
        let mut engine = FakeEngine::with_pages(&[("slow.pdf", 1), ("fast.pdf", 1)]);
        engine.slow.push("slow.pdf".to_string());
        let mut ocr_settings = settings(2);
        ocr_settings.timeout = Duration::from_millis(50);
        let pool = OcrWorkerPool::new(Arc::new(engine), ocr_settings);

        let outcome = pool
            .extract(&paths(&["slow.pdf", "fast.pdf"]), &CancellationToken::new(), None)
            .await;

        let slow = outcome.results[0].as_ref().unwrap();
        assert!(slow.status.contains("timed out after 50ms"));
        assert!(outcome.results[1].as_ref().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_word_lists_only_apply_when_configured() {
        let engine = Arc::new(FakeEngine::with_pages(&[("a.pdf", 1)]));
        let raw = OcrWorkerPool::new(engine.clone(), settings(1))
            .extract(&paths(&["a.pdf"]), &CancellationToken::new(), None)
            .await;
        assert_eq!(raw.results[0].as_ref().unwrap().text, "page 1");

        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("pol.txt"), "pago\n").unwrap();
        let mut corrected_settings = settings(1);
        corrected_settings.dictionary_dir = Some(dir.path().to_path_buf());
        let corrected = OcrWorkerPool::new(engine, corrected_settings)
            .extract(&paths(&["a.pdf"]), &CancellationToken::new(), None)
            .await;
        assert_eq!(corrected.results[0].as_ref().unwrap().text, "pago 1");
    }

    #[tokio::test]
    async fn test_expired_file_stops_at_next_page() {
        let mut engine = FakeEngine::with_pages(&[("slow.pdf", 3), ("next.pdf", 1)]);
        engine.slow.push("slow.pdf".to_string());
        let engine = Arc::new(engine);
        let mut ocr_settings = settings(1);
        ocr_settings.timeout = Duration::from_millis(50);
        let pool = OcrWorkerPool::new(engine.clone(), ocr_settings);
        let (sink, aggregator) = ProgressAggregator::channel();

        let started = std::time::Instant::now();
        let outcome = pool
            .extract(&paths(&["slow.pdf", "next.pdf"]), &CancellationToken::new(), Some(sink))
            .await;
        let progress = aggregator.finish().await;
        let elapsed = started.elapsed();

        assert!(!outcome.results[0].as_ref().unwrap().is_success());
        // The single worker slot frees only once the abandoned page returns,
        // so the next file sees its own full deadline.
        assert!(outcome.results[1].as_ref().unwrap().is_success());
        assert_eq!(progress, ProgressSnapshot { pages_done: 1, total_pages: 4 });

        let renders = engine.renders.lock().unwrap().clone();
        assert_eq!(renders, vec!["slow.pdf".to_string(), "next.pdf".to_string()]);
        assert!(elapsed < Duration::from_millis(1000), "took {:?}", elapsed);
    }
}
