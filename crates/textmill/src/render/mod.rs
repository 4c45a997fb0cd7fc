//! Page rendering: the producer half of the OCR pipeline.
//!
//! A multi-page source becomes a lazily-produced, memory-bounded, ordered
//! stream of page bitmaps. Pages are rendered in fixed-size batches on a
//! dedicated blocking task and pushed one at a time onto a bounded channel;
//! a full channel blocks the producer, which is the pipeline's only
//! backpressure knob. Each batch buffer is dropped as soon as its pages have
//! been handed off, bounding peak memory for large documents.
//!
//! The stream always terminates: every path ends with [`PageEvent::End`]
//! (and a rendering failure is preceded by one [`PageEvent::Failed`]), so
//! the consumer can never wait indefinitely.

#[cfg(feature = "pdf")]
pub mod pdfium;

use crate::error::{Result, TextmillError};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One item on the render queue.
///
/// A tagged variant rather than an ambiguous nullable sentinel: the consumer
/// can distinguish "here is a page" from "rendering broke" from "stream
/// finished".
#[derive(Debug)]
pub enum PageEvent {
    /// The next page bitmap, in document order.
    Page(DynamicImage),
    /// Rendering failed; no further pages will arrive.
    Failed(TextmillError),
    /// End of stream, pushed on both the success and the failure path.
    End,
}

/// Rendering backend capability.
///
/// Implementations turn a document into page bitmaps. All methods are
/// blocking; the producer runs them on a blocking task.
pub trait RenderBackend: Send + Sync {
    /// Total page count via cheap metadata, without rendering.
    /// Best-effort: returns 0 when the count cannot be determined.
    fn page_count(&self, path: &Path) -> usize;

    /// Render an inclusive 1-based page range at the given resolution,
    /// returning bitmaps in document order.
    fn render_range(&self, path: &Path, first_page: usize, last_page: usize, dpi: u32)
        -> Result<Vec<DynamicImage>>;

    /// Render the whole document in one call. Fallback for when the page
    /// count is unavailable.
    fn render_all(&self, path: &Path, dpi: u32) -> Result<Vec<DynamicImage>>;

    /// Probe whether the document already carries an embedded text layer
    /// (born-digital rather than scanned). Best-effort; `false` when
    /// undetermined.
    fn probe_text(&self, _path: &Path) -> bool {
        false
    }
}

/// Whether the path looks like a PDF.
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Whether the path looks like a raster image.
pub fn is_image(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .unwrap_or(false)
}

/// Start the producer: render `path` and return the receiving end of the
/// bounded page stream.
///
/// Must be called from within a tokio runtime. Dropping the receiver makes
/// the producer exit at its next send.
pub fn spawn_producer(
    backend: Arc<dyn RenderBackend>,
    path: PathBuf,
    dpi: u32,
    batch_size: usize,
    queue_capacity: usize,
) -> mpsc::Receiver<PageEvent> {
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));

    tokio::task::spawn_blocking(move || {
        produce_pages(backend, &path, dpi, batch_size.max(1), &tx);
        // End is best-effort: a dropped receiver already means nobody is
        // waiting for it.
        let _ = tx.blocking_send(PageEvent::End);
    });

    rx
}

fn produce_pages(
    backend: Arc<dyn RenderBackend>,
    path: &Path,
    dpi: u32,
    batch_size: usize,
    tx: &mpsc::Sender<PageEvent>,
) {
    if is_pdf(path) {
        produce_pdf_pages(backend, path, dpi, batch_size, tx);
    } else if is_image(path) {
        match image::open(path) {
            Ok(image) => {
                let _ = tx.blocking_send(PageEvent::Page(image));
            }
            Err(err) => {
                let _ = tx.blocking_send(PageEvent::Failed(TextmillError::rendering_with_source(
                    format!("Failed to decode image {}", path.display()),
                    err,
                )));
            }
        }
    } else {
        let _ = tx.blocking_send(PageEvent::Failed(TextmillError::UnsupportedFormat(format!(
            "Unsupported file type for OCR: {}",
            path.display()
        ))));
    }
}

fn produce_pdf_pages(
    backend: Arc<dyn RenderBackend>,
    path: &Path,
    dpi: u32,
    batch_size: usize,
    tx: &mpsc::Sender<PageEvent>,
) {
    let total_pages = backend.page_count(path);

    if total_pages == 0 {
        tracing::warn!("Page count unavailable; rendering entire document at once");
        match backend.render_all(path, dpi) {
            Ok(images) => {
                for image in images {
                    if tx.blocking_send(PageEvent::Page(image)).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = tx.blocking_send(PageEvent::Failed(err));
            }
        }
        return;
    }

    tracing::info!(
        "Document has {} pages; rendering in batches of {} at {} DPI",
        total_pages,
        batch_size,
        dpi
    );

    let mut first_page = 1;
    while first_page <= total_pages {
        let last_page = (first_page + batch_size - 1).min(total_pages);
        tracing::debug!("Rendering pages {}-{} / {}", first_page, last_page, total_pages);

        match backend.render_range(path, first_page, last_page, dpi) {
            Ok(batch) => {
                for image in batch {
                    if tx.blocking_send(PageEvent::Page(image)).is_err() {
                        return;
                    }
                }
                // batch buffer dropped here, before the next range renders
            }
            Err(err) => {
                let _ = tx.blocking_send(PageEvent::Failed(err));
                return;
            }
        }

        first_page = last_page + 1;
    }
}
