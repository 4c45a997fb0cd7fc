//! pdfium-backed [`RenderBackend`].
//!
//! Binds the pdfium dynamic library at construction time (library alongside
//! the executable first, system install second) and renders pages at a
//! resolution derived from the page geometry and the requested DPI.

use super::RenderBackend;
use crate::error::{Result, TextmillError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;

const PDF_POINTS_PER_INCH: f32 = 72.0;
const MIN_DPI: u32 = 72;
const MAX_DPI: u32 = 600;

/// Largest bitmap dimension we will ask pdfium for. Oversized pages get
/// their DPI scaled down instead of producing multi-gigabyte bitmaps.
const MAX_IMAGE_DIMENSION: u32 = 16_384;

/// Minimum embedded text length for a document to count as born-digital.
const EMBEDDED_TEXT_MIN_CHARS: usize = 100;

pub struct PdfiumRenderer {
    pdfium: Pdfium,
}

impl PdfiumRenderer {
    pub fn new() -> Result<Self> {
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| {
                TextmillError::rendering_with_source("Failed to bind pdfium library", e)
            })?;

        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    fn load_document<'a>(&'a self, path: &Path) -> Result<PdfDocument<'a>> {
        self.pdfium.load_pdf_from_file(path, None).map_err(|e| {
            TextmillError::rendering_with_source(
                format!("Failed to load PDF {}", path.display()),
                e,
            )
        })
    }

    fn render_page(&self, page: &PdfPage<'_>, dpi: u32) -> Result<DynamicImage> {
        let width_points = page.width().value;
        let height_points = page.height().value;

        let dpi = effective_dpi(width_points, height_points, dpi);
        let scale = dpi as f32 / PDF_POINTS_PER_INCH;

        let config = PdfRenderConfig::new()
            .set_target_width(((width_points * scale) as i32).max(1))
            .set_target_height(((height_points * scale) as i32).max(1))
            .rotate_if_landscape(PdfPageRenderRotation::None, false);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| TextmillError::rendering_with_source("Failed to render page", e))?;

        Ok(DynamicImage::ImageRgb8(bitmap.as_image().into_rgb8()))
    }
}

impl RenderBackend for PdfiumRenderer {
    fn page_count(&self, path: &Path) -> usize {
        match self.load_document(path) {
            Ok(document) => document.pages().len() as usize,
            Err(err) => {
                tracing::warn!("Could not read page count for {}: {}", path.display(), err);
                0
            }
        }
    }

    fn render_range(
        &self,
        path: &Path,
        first_page: usize,
        last_page: usize,
        dpi: u32,
    ) -> Result<Vec<DynamicImage>> {
        let document = self.load_document(path)?;
        let page_count = document.pages().len() as usize;
        let last_page = last_page.min(page_count);

        let mut images = Vec::with_capacity(last_page.saturating_sub(first_page) + 1);
        for page_number in first_page..=last_page {
            let page = document
                .pages()
                .get((page_number - 1) as u16)
                .map_err(|e| {
                    TextmillError::rendering_with_source(
                        format!("Page {} not found", page_number),
                        e,
                    )
                })?;
            images.push(self.render_page(&page, dpi)?);
        }

        Ok(images)
    }

    fn render_all(&self, path: &Path, dpi: u32) -> Result<Vec<DynamicImage>> {
        let document = self.load_document(path)?;
        let page_count = document.pages().len() as usize;
        drop(document);

        if page_count == 0 {
            return Err(TextmillError::rendering(format!(
                "Document has no pages: {}",
                path.display()
            )));
        }

        self.render_range(path, 1, page_count, dpi)
    }

    /// Check the first three pages for an embedded text layer. A document
    /// with real extractable text is born-digital, so skew correction can be
    /// skipped downstream.
    fn probe_text(&self, path: &Path) -> bool {
        let document = match self.load_document(path) {
            Ok(document) => document,
            Err(_) => return false,
        };

        for page in document.pages().iter().take(3) {
            if let Ok(text) = page.text() {
                if text.all().trim().chars().count() >= EMBEDDED_TEXT_MIN_CHARS {
                    return true;
                }
            }
        }

        false
    }
}

/// Clamp the requested DPI so the rendered bitmap stays within
/// [`MAX_IMAGE_DIMENSION`] on both axes.
fn effective_dpi(width_points: f32, height_points: f32, requested: u32) -> u32 {
    let width_inches = width_points / PDF_POINTS_PER_INCH;
    let height_inches = height_points / PDF_POINTS_PER_INCH;

    let width_at_target = (width_inches * requested as f32) as u32;
    let height_at_target = (height_inches * requested as f32) as u32;

    if width_at_target <= MAX_IMAGE_DIMENSION && height_at_target <= MAX_IMAGE_DIMENSION {
        return requested.clamp(MIN_DPI, MAX_DPI);
    }

    let width_limited = (MAX_IMAGE_DIMENSION as f32 / width_inches) as u32;
    let height_limited = (MAX_IMAGE_DIMENSION as f32 / height_inches) as u32;

    width_limited.min(height_limited).clamp(MIN_DPI, MAX_DPI)
}
