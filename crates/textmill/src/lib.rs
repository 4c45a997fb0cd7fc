//! Textmill - streaming OCR and text extraction with a content-addressed
//! result cache.
//!
//! Textmill turns scanned documents into text by overlapping page rendering
//! with parallel OCR, and amortizes the expensive recognition step behind a
//! two-level LRU cache keyed by content fingerprints: a page-level table for
//! OCR output and a file-level table for remote text extraction.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use textmill::{
//!     open_cache, CancelFlag, ExtractionClient, JobOptions, MemoryJobStore, Pipeline, Settings,
//! };
//!
//! # #[cfg(feature = "pdf")]
//! # async fn run() -> textmill::Result<()> {
//! let settings = Settings::load();
//! let cache = open_cache(&settings);
//! let renderer = Arc::new(textmill::render::pdfium::PdfiumRenderer::new()?);
//! let extractor = Arc::new(ExtractionClient::new(
//!     &settings.extraction_url,
//!     settings.extraction_timeout(),
//! )?);
//! let store = Arc::new(MemoryJobStore::new());
//!
//! let pipeline = Pipeline::new(
//!     settings,
//!     cache,
//!     renderer,
//!     extractor,
//!     textmill::ocr::engine_registry(),
//!     store.clone(),
//! );
//!
//! pipeline
//!     .run_job("job-1", "scan.pdf".as_ref(), &JobOptions::default(), &CancelFlag::new())
//!     .await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`render`]: the producer - batched page rendering onto a bounded queue
//! - [`ocr`]: the engine capability, registry, and preprocessing
//! - [`pipeline`]: the consumer - bounded-concurrency OCR, ordering,
//!   progress, cancellation
//! - [`cache`]: the two-table LRU result cache
//! - [`hashing`]: content fingerprints the cache is keyed by
//! - [`extraction`]: the remote text-extraction client (text mode)
//! - [`jobs`]: job status reporting and result persistence

#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod error;
pub mod extraction;
pub mod hashing;
pub mod jobs;
pub mod ocr;
pub mod pipeline;
pub mod render;
pub mod types;

pub use cache::{CacheStats, ResultCache};
pub use config::{CacheSettings, Settings};
pub use error::{Result, TextmillError};
pub use extraction::{ExtractionClient, TextExtractor};
pub use jobs::{JobArtifacts, JobStore, MemoryJobStore};
pub use ocr::{engine_registry, EngineRegistry, OcrEngine, OcrOutcome};
pub use pipeline::{open_cache, Pipeline};
pub use render::RenderBackend;
pub use types::{
    CancelFlag, EngineParams, JobOptions, JobOutput, JobStatus, Mode, PageRecord, PreprocessProfile,
};
