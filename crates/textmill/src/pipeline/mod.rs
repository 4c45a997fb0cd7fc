//! The extraction pipeline: producer/consumer OCR execution plus the
//! text-only extraction path.
//!
//! One renderer task pushes page bitmaps onto a bounded channel while a
//! fixed-size worker pool drains it, consulting the page cache before every
//! engine call. Worker permits are acquired before a page is taken off the
//! channel, so a saturated pool backs the renderer up through the channel -
//! end-to-end backpressure with the channel capacity as the only knob.
//!
//! Ordering: pages are submitted in document order, complete in any order,
//! and are reassembled by ascending index before the job output is built.
//!
//! Failure containment: one page failing never aborts the document; a
//! rendering failure stops submission but lets in-flight pages finish; only
//! a document that produced zero pages fails outright. Cancellation is
//! polled after every completion and abandons all outstanding work without
//! writing further progress or artifacts.

use crate::cache::{FileEntry, PageEntry, ResultCache};
use crate::config::Settings;
use crate::error::{Result, TextmillError};
use crate::extraction::TextExtractor;
use crate::hashing::{file_options_hash, hash_file, hash_image, page_options_hash, FileFingerprint, PageFingerprint};
use crate::jobs::{persist_output, JobStore};
use crate::ocr::{EngineRegistry, OcrEngine};
use crate::render::{self, PageEvent, RenderBackend};
use crate::types::{CancelFlag, EngineParams, JobOptions, JobOutput, JobStatus, Mode, PageRecord};
use image::DynamicImage;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Completion threshold above which the pipeline logs periodic buffer
/// release checkpoints for large documents.
const LARGE_DOCUMENT_PAGES: usize = 50;

/// How a job run ended, before terminal status bookkeeping.
enum JobRun {
    Completed(JobOutput),
    Cancelled,
}

/// Successful output of one page task.
struct PageOutcome {
    text: String,
    confidence: Option<f64>,
}

/// The extraction pipeline with its shared services.
///
/// Construct once and share: the cache connection and engine registry are
/// meant to live for the process, reused across all jobs.
pub struct Pipeline {
    settings: Settings,
    cache: Option<Arc<ResultCache>>,
    renderer: Arc<dyn RenderBackend>,
    extractor: Arc<dyn TextExtractor>,
    engines: Arc<EngineRegistry>,
    job_store: Arc<dyn JobStore>,
}

/// Open the result cache described by `settings`, degrading to no cache
/// (pass-through misses) when persistence is unavailable.
pub fn open_cache(settings: &Settings) -> Option<Arc<ResultCache>> {
    if !settings.cache.enabled {
        return None;
    }
    match ResultCache::open(
        &settings.cache.path,
        settings.cache.max_page_entries,
        settings.cache.max_file_entries,
    ) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(err) => {
            tracing::warn!("Result cache unavailable, running uncached: {}", err);
            None
        }
    }
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        cache: Option<Arc<ResultCache>>,
        renderer: Arc<dyn RenderBackend>,
        extractor: Arc<dyn TextExtractor>,
        engines: Arc<EngineRegistry>,
        job_store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            settings,
            cache,
            renderer,
            extractor,
            engines,
            job_store,
        }
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    /// Run one extraction job to a terminal state.
    ///
    /// All effects flow through the job store and the result directory;
    /// internal errors are caught here and converted to a failed status
    /// rather than propagated.
    pub async fn run_job(&self, job_id: &str, path: &Path, options: &JobOptions, cancel: &CancelFlag) {
        tracing::info!(
            "Processing job {}: file={}, mode={}, engine={}",
            job_id,
            path.display(),
            options.mode.as_str(),
            options.engine
        );

        self.job_store.update_status(job_id, JobStatus::Running, None, None).await;
        self.job_store.update_progress(job_id, 0).await;

        match self.run_job_inner(job_id, path, options, cancel).await {
            Ok(JobRun::Cancelled) => {
                tracing::info!("Job {} cancelled", job_id);
                self.job_store
                    .update_status(job_id, JobStatus::Cancelled, None, None)
                    .await;
            }
            Ok(JobRun::Completed(output)) => match persist_output(&self.settings.result_dir, &output).await {
                Ok(artifacts) => {
                    self.job_store.update_progress(job_id, 100).await;
                    self.job_store
                        .update_status(job_id, JobStatus::Completed, None, Some(artifacts))
                        .await;
                    tracing::info!(
                        "Job {} completed: {} page(s), {} recorded error(s)",
                        job_id,
                        output.pages.len(),
                        output.errors.len()
                    );
                }
                Err(err) => {
                    tracing::error!("Job {} failed to persist results: {}", job_id, err);
                    self.job_store
                        .update_status(
                            job_id,
                            JobStatus::Failed,
                            Some(format!("Failed to persist results: {}", err)),
                            None,
                        )
                        .await;
                }
            },
            Err(err) => {
                tracing::error!("Job {} failed: {}", job_id, err);
                self.job_store
                    .update_status(job_id, JobStatus::Failed, Some(err.to_string()), None)
                    .await;
            }
        }
    }

    async fn run_job_inner(
        &self,
        job_id: &str,
        path: &Path,
        options: &JobOptions,
        cancel: &CancelFlag,
    ) -> Result<JobRun> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();
        let output = JobOutput::new(job_id, &filename, options);

        match options.mode {
            Mode::Text => self.run_text_mode(job_id, path, options, output).await,
            Mode::Ocr | Mode::Both => self.run_ocr_mode(job_id, path, options, cancel, output).await,
        }
    }

    /// Text-only mode: file-level cache lookup, then the remote extraction
    /// service. No renderer, no worker pool. A remote failure fails the
    /// whole job; there is no partial result to keep.
    async fn run_text_mode(
        &self,
        job_id: &str,
        path: &Path,
        options: &JobOptions,
        mut output: JobOutput,
    ) -> Result<JobRun> {
        tracing::info!("Text-only mode for job {}", job_id);

        let fingerprint = if self.cache.is_some() {
            let hash_path = path.to_path_buf();
            let file_hash = tokio::task::spawn_blocking(move || hash_file(&hash_path))
                .await
                .map_err(|e| TextmillError::Other(format!("File hashing task failed: {}", e)))??;
            Some(FileFingerprint {
                file_hash,
                options_hash: file_options_hash(options),
            })
        } else {
            None
        };

        if let (Some(cache), Some(fp)) = (self.cache.as_ref(), fingerprint.as_ref()) {
            match cache.get_file(fp) {
                Ok(Some(entry)) => {
                    tracing::info!("File cache hit for job {} (skipping extraction service)", job_id);
                    output.extracted_text = entry.extracted_text;
                    output.metadata = entry.metadata;
                    output.final_text = entry.final_text;
                    return Ok(JobRun::Completed(output));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!("File cache read failed, continuing uncached: {}", err);
                }
            }
        }

        let text = self.extractor.extract_text(path).await?;
        let metadata = self.extractor.extract_metadata(path).await?;
        tracing::info!(
            "Extraction service completed for job {}. Text length: {}",
            job_id,
            text.len()
        );

        output.extracted_text = text;
        output.metadata = metadata;
        output.final_text = output.extracted_text.clone();

        if let (Some(cache), Some(fp)) = (self.cache.as_ref(), fingerprint.as_ref()) {
            let entry = FileEntry {
                extracted_text: output.extracted_text.clone(),
                metadata: output.metadata.clone(),
                final_text: output.final_text.clone(),
            };
            if let Err(err) = cache.set_file(fp, &entry) {
                tracing::debug!("File cache write failed (ignored): {}", err);
            }
        }

        Ok(JobRun::Completed(output))
    }

    /// The page pipeline: stream rendered pages into the worker pool,
    /// collect completions in any order, reassemble in document order.
    async fn run_ocr_mode(
        &self,
        job_id: &str,
        path: &Path,
        options: &JobOptions,
        cancel: &CancelFlag,
        mut output: JobOutput,
    ) -> Result<JobRun> {
        tracing::info!("OCR mode ({}) for job {}", options.mode.as_str(), job_id);

        let engine = self
            .engines
            .get(&options.engine)?
            .ok_or_else(|| TextmillError::validation(format!("Unsupported OCR engine: {}", options.engine)))?;

        let source_is_pdf = render::is_pdf(path);

        // Born-digital PDFs are already axis-aligned; skip skew correction.
        let deskew = if source_is_pdf {
            let renderer = self.renderer.clone();
            let probe_path = path.to_path_buf();
            let born_digital = tokio::task::spawn_blocking(move || renderer.probe_text(&probe_path))
                .await
                .unwrap_or(false);
            tracing::info!(
                "Scan detection for job {}: {}",
                job_id,
                if born_digital { "digital (deskew disabled)" } else { "scanned" }
            );
            !born_digital
        } else {
            true
        };

        let params = options.engine_params(deskew);
        let dpi = options.dpi.unwrap_or(self.settings.dpi);
        let options_hash = page_options_hash(options);
        let page_timeout = self.settings.page_timeout();

        // Upfront estimate so progress is meaningful before rendering ends;
        // refined to the true count once the stream terminates.
        let mut total_pages = if source_is_pdf {
            let renderer = self.renderer.clone();
            let count_path = path.to_path_buf();
            tokio::task::spawn_blocking(move || renderer.page_count(&count_path))
                .await
                .unwrap_or(0)
        } else {
            1
        };
        if total_pages == 0 {
            total_pages = 1;
        }

        let mut rx = render::spawn_producer(
            self.renderer.clone(),
            path.to_path_buf(),
            dpi,
            self.settings.batch_size,
            self.settings.queue_capacity(),
        );

        tracing::info!(
            "Streaming OCR started: ~{} page(s), {} worker(s), cache={} for job {}",
            total_pages,
            self.settings.page_workers,
            if self.cache.is_some() { "on" } else { "off" },
            job_id
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.page_workers.max(1)));
        let mut join_set: JoinSet<(usize, Result<PageOutcome>)> = JoinSet::new();

        let mut render_done = false;
        let mut render_error: Option<TextmillError> = None;
        let mut submitted = 0usize;
        let mut completed = 0usize;
        let mut last_progress = 0u8;
        let mut results: BTreeMap<usize, std::result::Result<PageOutcome, String>> = BTreeMap::new();
        let mut cancelled = false;

        loop {
            tokio::select! {
                event = rx.recv(), if !render_done => {
                    match event {
                        Some(PageEvent::Page(image)) => {
                            if render_error.is_some() {
                                // Rendering already failed: drain so the
                                // producer can exit, submit nothing new.
                                continue;
                            }
                            let permit = match semaphore.clone().acquire_owned().await {
                                Ok(permit) => permit,
                                Err(_) => break,
                            };
                            submitted += 1;
                            let index = submitted;
                            let engine = engine.clone();
                            let params = params.clone();
                            let cache = self.cache.clone();
                            let options_hash = options_hash.clone();
                            join_set.spawn(async move {
                                let _permit = permit;
                                run_page_task(index, image, engine, params, cache, options_hash, page_timeout).await
                            });
                        }
                        Some(PageEvent::Failed(err)) => {
                            tracing::error!("Page rendering failed for job {}: {}", job_id, err);
                            render_error = Some(err);
                        }
                        Some(PageEvent::End) | None => {
                            render_done = true;
                            if submitted > 0 {
                                total_pages = submitted;
                            }
                        }
                    }
                }
                joined = join_set.join_next(), if !join_set.is_empty() => {
                    let Some(joined) = joined else { continue };

                    match joined {
                        Ok((index, page_result)) => {
                            completed += 1;
                            match page_result {
                                Ok(outcome) => {
                                    results.insert(index, Ok(outcome));
                                }
                                Err(err) => {
                                    let message = format!("Page {} OCR failed: {}", index, err);
                                    tracing::warn!("{}", message);
                                    output.errors.push(message.clone());
                                    results.insert(index, Err(message));
                                }
                            }
                            tracing::debug!("OCR page {}/{} done ({} completed)", index, total_pages, completed);
                        }
                        Err(join_err) => {
                            if join_err.is_cancelled() {
                                continue;
                            }
                            completed += 1;
                            let message = format!("OCR task panicked: {}", join_err);
                            tracing::error!("{}", message);
                            output.errors.push(message);
                        }
                    }

                    let progress = job_progress(completed, total_pages).max(last_progress);
                    if progress != last_progress {
                        last_progress = progress;
                        self.job_store.update_progress(job_id, progress).await;
                    }

                    if total_pages > LARGE_DOCUMENT_PAGES && completed % 10 == 0 {
                        tracing::debug!("Released page buffers after {} completions", completed);
                    }

                    if cancel.is_cancelled() {
                        tracing::info!("Job {} cancelled during OCR", job_id);
                        join_set.abort_all();
                        cancelled = true;
                        break;
                    }
                }
                else => break,
            }
        }

        if cancelled || cancel.is_cancelled() {
            return Ok(JobRun::Cancelled);
        }

        if let Some(err) = render_error {
            if submitted == 0 {
                return Err(err);
            }
            output.errors.push(format!("Page rendering failed: {}", err));
        }

        // Reassemble strictly by ascending page index. Indices without a
        // result (early rendering exit) are simply absent.
        for (index, record) in results {
            match record {
                Ok(outcome) => output.pages.push(PageRecord {
                    page: index,
                    text: outcome.text,
                    engine: options.engine.clone(),
                    confidence: outcome.confidence,
                    error: None,
                }),
                Err(message) => output.pages.push(PageRecord {
                    page: index,
                    text: String::new(),
                    engine: options.engine.clone(),
                    confidence: None,
                    error: Some(message),
                }),
            }
        }

        output.ocr_text = output
            .pages
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        tracing::info!(
            "OCR completed for job {}. Total text length: {}",
            job_id,
            output.ocr_text.len()
        );

        if options.mode == Mode::Both {
            output.final_text = output.ocr_text.clone();
        }

        Ok(JobRun::Completed(output))
    }
}

/// One page task: fingerprint, cache consult, engine call, cache populate.
async fn run_page_task(
    index: usize,
    image: DynamicImage,
    engine: Arc<dyn OcrEngine>,
    params: EngineParams,
    cache: Option<Arc<ResultCache>>,
    options_hash: String,
    timeout: Option<Duration>,
) -> (usize, Result<PageOutcome>) {
    let result = run_page(index, image, engine, params, cache, options_hash, timeout).await;
    (index, result)
}

async fn run_page(
    index: usize,
    image: DynamicImage,
    engine: Arc<dyn OcrEngine>,
    params: EngineParams,
    cache: Option<Arc<ResultCache>>,
    options_hash: String,
    timeout: Option<Duration>,
) -> Result<PageOutcome> {
    let mut fingerprint = None;

    let image = if let Some(cache) = cache.as_ref() {
        // The canonical PNG encode behind the digest is CPU work; keep it
        // off the async workers.
        let (image, hash_result) = tokio::task::spawn_blocking(move || {
            let hash = hash_image(&image);
            (image, hash)
        })
        .await
        .map_err(|e| TextmillError::ocr(format!("Page hashing task failed: {}", e)))?;

        match hash_result {
            Ok(image_hash) => {
                let fp = PageFingerprint {
                    image_hash,
                    options_hash,
                };
                match cache.get_page(&fp) {
                    Ok(Some(entry)) => {
                        tracing::info!("Page {}: cache hit (skipping engine call)", index);
                        return Ok(PageOutcome {
                            text: entry.text,
                            confidence: entry.confidence,
                        });
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!("Page cache read failed, continuing uncached: {}", err);
                    }
                }
                fingerprint = Some(fp);
            }
            Err(err) => {
                tracing::warn!("Page {} fingerprint failed, continuing uncached: {}", index, err);
            }
        }
        image
    } else {
        image
    };

    let recognize = engine.recognize(image, params);
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, recognize).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TextmillError::ocr(format!(
                    "Page {} OCR timed out after {}s",
                    index,
                    limit.as_secs()
                )));
            }
        },
        None => recognize.await?,
    };

    // Only successes reach the cache: a failed page must be retried by the
    // next run, never served back.
    if let (Some(cache), Some(fp)) = (cache.as_ref(), fingerprint.as_ref()) {
        let entry = PageEntry {
            text: outcome.text.clone(),
            confidence: Some(outcome.confidence),
            page_bytes: outcome.page_bytes.clone(),
        };
        if let Err(err) = cache.set_page(fp, &entry) {
            tracing::debug!("Page cache write failed (ignored): {}", err);
        }
    }

    Ok(PageOutcome {
        text: outcome.text,
        confidence: Some(outcome.confidence),
    })
}

fn job_progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    (((completed as f64 / total as f64) * 100.0).round().min(100.0)) as u8
}
