//! OCR engine capability and registry.
//!
//! Engines are pluggable: anything that can turn a page bitmap plus
//! parameters into text implements [`OcrEngine`] and registers under a name.
//! One default implementation (Tesseract) ships behind the `ocr` feature;
//! the registry exists so alternative engines can be dropped in without
//! touching the pipeline.

pub mod preprocess;

#[cfg(feature = "ocr")]
pub mod tesseract;

use crate::error::{Result, TextmillError};
use crate::types::EngineParams;
use async_trait::async_trait;
use image::DynamicImage;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Output of one engine invocation on one page.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub text: String,
    /// Mean word confidence, 0-100.
    pub confidence: f64,
    /// Optional searchable artifact for the page (hOCR bytes).
    pub page_bytes: Option<Vec<u8>>,
}

/// An OCR engine.
///
/// Implementations must be thread-safe: the worker pool calls `recognize`
/// concurrently. Blocking engines should wrap their work in
/// `tokio::task::spawn_blocking`.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Registry name, lowercase, no whitespace.
    fn name(&self) -> &str;

    /// Recognize text on a single page bitmap.
    ///
    /// # Errors
    ///
    /// Engine failures surface as [`TextmillError::Ocr`]; the pipeline
    /// records them per page and continues with the rest of the document.
    async fn recognize(&self, image: DynamicImage, params: EngineParams) -> Result<OcrOutcome>;
}

fn validate_engine_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TextmillError::validation("Engine name cannot be empty"));
    }
    if name.contains(char::is_whitespace) {
        return Err(TextmillError::validation(format!(
            "Engine name '{}' cannot contain whitespace",
            name
        )));
    }
    Ok(())
}

/// Name-keyed registry of OCR engines.
pub struct EngineRegistry {
    engines: RwLock<HashMap<String, Arc<dyn OcrEngine>>>,
}

impl EngineRegistry {
    /// Registry pre-populated with the default engines available in this
    /// build.
    pub fn new() -> Self {
        let registry = Self::new_empty();

        #[cfg(feature = "ocr")]
        {
            let _ = registry.register(Arc::new(tesseract::TesseractEngine::new()));
        }

        registry
    }

    /// Registry with no engines; callers register their own.
    pub fn new_empty() -> Self {
        Self {
            engines: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, engine: Arc<dyn OcrEngine>) -> Result<()> {
        validate_engine_name(engine.name())?;
        let mut engines = self
            .engines
            .write()
            .map_err(|e| TextmillError::LockPoisoned(format!("Engine registry lock poisoned: {}", e)))?;
        engines.insert(engine.name().to_string(), engine);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<Arc<dyn OcrEngine>>> {
        let engines = self
            .engines
            .read()
            .map_err(|e| TextmillError::LockPoisoned(format!("Engine registry lock poisoned: {}", e)))?;
        Ok(engines.get(name).cloned())
    }

    pub fn names(&self) -> Vec<String> {
        match self.engines.read() {
            Ok(engines) => {
                let mut names: Vec<String> = engines.keys().cloned().collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REGISTRY: Lazy<Arc<EngineRegistry>> = Lazy::new(|| Arc::new(EngineRegistry::new()));

/// Process-wide engine registry with the default engines registered.
pub fn engine_registry() -> Arc<EngineRegistry> {
    GLOBAL_REGISTRY.clone()
}
