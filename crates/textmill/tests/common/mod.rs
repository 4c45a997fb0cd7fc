//! Shared stubs for pipeline integration tests: a synthetic render backend,
//! a scriptable OCR engine, and a canned extraction service.
#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, Rgb};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use textmill::{
    CancelFlag, EngineParams, EngineRegistry, JobOptions, MemoryJobStore, Mode, OcrEngine,
    OcrOutcome, Pipeline, PreprocessProfile, RenderBackend, Result, Settings, TextExtractor,
    TextmillError,
};

/// A tiny page bitmap with its 1-based index encoded in the corner pixel so
/// stub engines can tell pages apart.
pub fn synthetic_page(index: usize) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(8, 8, move |x, y| {
        if (x, y) == (0, 0) {
            Rgb([index as u8, 7, 7])
        } else {
            Rgb([255, 255, 255])
        }
    }))
}

pub fn page_index(image: &DynamicImage) -> usize {
    image.to_rgb8().get_pixel(0, 0)[0] as usize
}

/// Render backend producing synthetic pages, optionally failing from a
/// given page onward.
pub struct StubRenderer {
    pub total: usize,
    pub fail_from_page: Option<usize>,
    pub report_count: bool,
}

impl StubRenderer {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            fail_from_page: None,
            report_count: true,
        }
    }

    pub fn failing_from(total: usize, fail_from_page: usize) -> Self {
        Self {
            total,
            fail_from_page: Some(fail_from_page),
            report_count: true,
        }
    }
}

impl RenderBackend for StubRenderer {
    fn page_count(&self, _path: &Path) -> usize {
        if self.report_count {
            self.total
        } else {
            0
        }
    }

    fn render_range(
        &self,
        _path: &Path,
        first_page: usize,
        last_page: usize,
        _dpi: u32,
    ) -> Result<Vec<DynamicImage>> {
        if let Some(fail_from) = self.fail_from_page {
            if first_page >= fail_from {
                return Err(TextmillError::rendering("stub backend render failure"));
            }
        }
        Ok((first_page..=last_page.min(self.total))
            .map(synthetic_page)
            .collect())
    }

    fn render_all(&self, path: &Path, dpi: u32) -> Result<Vec<DynamicImage>> {
        self.render_range(path, 1, self.total, dpi)
    }
}

/// OCR engine whose per-page behavior (delay, failure, cancellation hook) is
/// scripted by the test.
pub struct ScriptedEngine {
    delays: Mutex<HashMap<usize, Duration>>,
    failures: Mutex<HashSet<usize>>,
    calls: AtomicUsize,
    completion_order: Mutex<Vec<usize>>,
    cancel_on: Mutex<Option<(usize, CancelFlag)>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            delays: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
            completion_order: Mutex::new(Vec::new()),
            cancel_on: Mutex::new(None),
        }
    }

    pub fn set_delay(&self, page: usize, delay: Duration) {
        self.delays.lock().unwrap().insert(page, delay);
    }

    pub fn fail_on(&self, page: usize) {
        self.failures.lock().unwrap().insert(page);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Trip the cancel flag while recognizing `page`, before that page
    /// completes. The coordinator polls the flag right after the page's
    /// completion, making the cancellation point deterministic.
    pub fn cancel_while_recognizing(&self, page: usize, flag: CancelFlag) {
        *self.cancel_on.lock().unwrap() = Some((page, flag));
    }

    /// Number of engine invocations so far (cache hits bypass the engine).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completion_order(&self) -> Vec<usize> {
        self.completion_order.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn recognize(&self, image: DynamicImage, _params: EngineParams) -> Result<OcrOutcome> {
        let index = page_index(&image);
        self.calls.fetch_add(1, Ordering::SeqCst);

        let cancel_hook = self.cancel_on.lock().unwrap().clone();
        if let Some((page, flag)) = cancel_hook {
            if page == index {
                flag.cancel();
            }
        }

        let delay = self.delays.lock().unwrap().get(&index).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failures.lock().unwrap().contains(&index) {
            return Err(TextmillError::ocr(format!("scripted failure on page {}", index)));
        }

        self.completion_order.lock().unwrap().push(index);
        Ok(OcrOutcome {
            text: format!("text of page {}", index),
            confidence: 88.0,
            page_bytes: Some(b"<hocr/>".to_vec()),
        })
    }
}

/// Extraction service stub with a canned response and a call counter.
pub struct StubExtractor {
    pub text: String,
    pub fail: std::sync::atomic::AtomicBool,
    pub calls: AtomicUsize,
}

impl StubExtractor {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            fail: std::sync::atomic::AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(text: &str) -> Self {
        let extractor = Self::new(text);
        extractor.fail.store(true, Ordering::SeqCst);
        extractor
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for StubExtractor {
    async fn extract_text(&self, _path: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TextmillError::extraction("stub extraction outage"));
        }
        Ok(self.text.clone())
    }

    async fn extract_metadata(&self, _path: &Path) -> Result<HashMap<String, serde_json::Value>> {
        let mut metadata = HashMap::new();
        metadata.insert(
            "Content-Type".to_string(),
            serde_json::json!("application/pdf"),
        );
        Ok(metadata)
    }
}

/// Settings scoped to a test scratch directory.
pub fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.page_workers = 2;
    settings.batch_size = 10;
    settings.result_dir = dir.join("results");
    settings.cache.path = dir.join("cache.db");
    settings
}

/// Pipeline wired with the given stubs plus a fresh in-memory job store.
pub fn build_pipeline(
    settings: Settings,
    renderer: Arc<dyn RenderBackend>,
    engine: Arc<dyn OcrEngine>,
    extractor: Arc<dyn TextExtractor>,
) -> (Pipeline, Arc<MemoryJobStore>) {
    let registry = Arc::new(EngineRegistry::new_empty());
    registry.register(engine).unwrap();

    let cache = textmill::open_cache(&settings);
    let store = Arc::new(MemoryJobStore::new());
    let pipeline = Pipeline::new(settings, cache, renderer, extractor, registry, store.clone());
    (pipeline, store)
}

/// Job options targeting the scripted engine in OCR+text mode.
pub fn ocr_options() -> JobOptions {
    JobOptions {
        mode: Mode::Both,
        engine: "scripted".to_string(),
        language: "eng".to_string(),
        psm: 6,
        oem: 1,
        preprocess: PreprocessProfile::None,
        dpi: None,
    }
}

/// Read a completed job's persisted JSON output.
pub fn read_output(store: &MemoryJobStore, job_id: &str) -> textmill::JobOutput {
    let record = store.get(job_id).expect("job record");
    let artifacts = record.artifacts.expect("job artifacts");
    serde_json::from_slice(&std::fs::read(&artifacts.json_path).unwrap()).unwrap()
}
