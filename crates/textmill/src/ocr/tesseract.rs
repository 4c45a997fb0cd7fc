//! Tesseract OCR engine (feature `ocr`).
//!
//! Links the system libtesseract via the `tesseract` crate. Recognition is
//! CPU-bound and blocking, so each call runs on the blocking thread pool.

use super::preprocess::preprocess_for_ocr;
use super::{OcrEngine, OcrOutcome};
use crate::error::{Result, TextmillError};
use crate::types::EngineParams;
use async_trait::async_trait;
use image::DynamicImage;
use std::io::Cursor;
use tesseract::{OcrEngineMode, PageSegMode, Tesseract};

pub struct TesseractEngine {
    datapath: Option<String>,
}

impl TesseractEngine {
    /// Engine using `TESSDATA_PREFIX` (or the library's default search) for
    /// trained language data.
    pub fn new() -> Self {
        Self {
            datapath: std::env::var("TESSDATA_PREFIX").ok(),
        }
    }

    pub fn with_datapath(datapath: impl Into<String>) -> Self {
        Self {
            datapath: Some(datapath.into()),
        }
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: DynamicImage, params: EngineParams) -> Result<OcrOutcome> {
        let datapath = self.datapath.clone();
        tokio::task::spawn_blocking(move || recognize_blocking(datapath, image, params))
            .await
            .map_err(|e| TextmillError::ocr(format!("OCR task failed to run: {}", e)))?
    }
}

fn recognize_blocking(
    datapath: Option<String>,
    image: DynamicImage,
    params: EngineParams,
) -> Result<OcrOutcome> {
    if params.language.trim().is_empty() {
        return Err(TextmillError::validation(
            "Language cannot be empty. Specify a valid language code (e.g. 'eng')",
        ));
    }

    tracing::debug!(
        "Running Tesseract: lang={} psm={} oem={} preprocess={} deskew={}",
        params.language,
        params.psm,
        params.oem,
        params.preprocess.as_str(),
        params.deskew
    );

    let prepared = preprocess_for_ocr(image, params.preprocess, params.deskew);

    let mut png = Vec::new();
    prepared.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;

    let mut tess = Tesseract::new_with_oem(
        datapath.as_deref(),
        Some(&params.language),
        engine_mode(params.oem),
    )
    .map_err(|e| {
        TextmillError::ocr_with_source(
            format!("Failed to initialize Tesseract for language '{}'", params.language),
            e,
        )
    })?
    .set_image_from_mem(&png)
    .map_err(|e| TextmillError::ocr_with_source("Failed to set image", e))?;

    tess.set_page_seg_mode(page_seg_mode(params.psm));

    let text = tess
        .get_text()
        .map_err(|e| TextmillError::ocr_with_source("Failed to extract text", e))?
        .trim()
        .to_string();

    let confidence = (tess.mean_text_conf() as f64).clamp(0.0, 100.0);

    // hOCR carries word boxes, which is what downstream consumers need to
    // build a searchable page. Best-effort only.
    let page_bytes = tess.get_hocr_text(0).ok().map(String::into_bytes);

    Ok(OcrOutcome {
        text,
        confidence,
        page_bytes,
    })
}

fn engine_mode(oem: u8) -> OcrEngineMode {
    match oem {
        0 => OcrEngineMode::TesseractOnly,
        1 => OcrEngineMode::LstmOnly,
        2 => OcrEngineMode::TesseractLstmCombined,
        _ => OcrEngineMode::Default,
    }
}

fn page_seg_mode(psm: u8) -> PageSegMode {
    match psm {
        0 => PageSegMode::PsmOsdOnly,
        1 => PageSegMode::PsmAutoOsd,
        2 => PageSegMode::PsmAutoOnly,
        3 => PageSegMode::PsmAuto,
        4 => PageSegMode::PsmSingleColumn,
        5 => PageSegMode::PsmSingleBlockVertText,
        6 => PageSegMode::PsmSingleBlock,
        7 => PageSegMode::PsmSingleLine,
        8 => PageSegMode::PsmSingleWord,
        9 => PageSegMode::PsmCircleWord,
        10 => PageSegMode::PsmSingleChar,
        11 => PageSegMode::PsmSparseText,
        12 => PageSegMode::PsmSparseTextOsd,
        13 => PageSegMode::PsmRawLine,
        _ => PageSegMode::PsmAuto,
    }
}
