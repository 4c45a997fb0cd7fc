//! Core data model: job options, per-page records, job output, statuses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Processing mode for an extraction job.
///
/// - `Text`: remote text extraction only, no OCR, served from the file cache
///   when possible.
/// - `Ocr`: page pipeline only; extracted page text is recorded but the final
///   text field stays empty.
/// - `Both`: page pipeline; the OCR text becomes the final text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Text,
    Ocr,
    Both,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Text
    }
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Text => "text",
            Mode::Ocr => "ocr",
            Mode::Both => "both",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "text" => Ok(Mode::Text),
            "ocr" => Ok(Mode::Ocr),
            "both" => Ok(Mode::Both),
            other => Err(format!(
                "Invalid mode: '{}'. Must be one of: text, ocr, both",
                other
            )),
        }
    }

    /// Whether this mode runs the page pipeline.
    pub fn uses_ocr(&self) -> bool {
        matches!(self, Mode::Ocr | Mode::Both)
    }
}

/// Image preprocessing profile applied before recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreprocessProfile {
    None,
    Standard,
    Aggressive,
}

impl Default for PreprocessProfile {
    fn default() -> Self {
        PreprocessProfile::Standard
    }
}

impl PreprocessProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreprocessProfile::None => "none",
            PreprocessProfile::Standard => "standard",
            PreprocessProfile::Aggressive => "aggressive",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "none" => Ok(PreprocessProfile::None),
            "standard" => Ok(PreprocessProfile::Standard),
            "aggressive" => Ok(PreprocessProfile::Aggressive),
            other => Err(format!(
                "Invalid preprocess profile: '{}'. Must be one of: none, standard, aggressive",
                other
            )),
        }
    }
}

fn default_engine() -> String {
    "tesseract".to_string()
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_psm() -> u8 {
    6
}

fn default_oem() -> u8 {
    1
}

/// Options controlling one extraction job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default)]
    pub mode: Mode,

    /// OCR engine name, resolved against the engine registry.
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Recognition language code (e.g. "eng", "deu").
    #[serde(default = "default_language")]
    pub language: String,

    /// Page segmentation mode (Tesseract PSM).
    #[serde(default = "default_psm")]
    pub psm: u8,

    /// OCR engine mode (Tesseract OEM).
    #[serde(default = "default_oem")]
    pub oem: u8,

    #[serde(default)]
    pub preprocess: PreprocessProfile,

    /// Render resolution override; falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            engine: default_engine(),
            language: default_language(),
            psm: default_psm(),
            oem: default_oem(),
            preprocess: PreprocessProfile::default(),
            dpi: None,
        }
    }
}

impl JobOptions {
    /// Engine parameters for this job's pages.
    ///
    /// `deskew` comes from scan detection, not from the options themselves:
    /// born-digital documents skip skew correction.
    pub fn engine_params(&self, deskew: bool) -> EngineParams {
        EngineParams {
            language: self.language.clone(),
            psm: self.psm,
            oem: self.oem,
            preprocess: self.preprocess,
            deskew,
        }
    }
}

/// Parameters handed to an OCR engine for a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineParams {
    pub language: String,
    pub psm: u8,
    pub oem: u8,
    pub preprocess: PreprocessProfile,
    pub deskew: bool,
}

/// One page of the final, document-ordered output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// 1-based page number in document order.
    pub page: usize,
    pub text: String,
    pub engine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full output of one extraction job, persisted as the job's result payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub job_id: String,
    pub filename: String,
    /// Text from the remote extraction service (text mode).
    pub extracted_text: String,
    /// Concatenated page text from the OCR pipeline.
    pub ocr_text: String,
    /// The text the caller should use, per the job's mode.
    pub final_text: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub pages: Vec<PageRecord>,
    pub errors: Vec<String>,
    pub options: JobOptions,
}

impl JobOutput {
    pub fn new(job_id: &str, filename: &str, options: &JobOptions) -> Self {
        Self {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            extracted_text: String::new(),
            ocr_text: String::new(),
            final_text: String::new(),
            metadata: HashMap::new(),
            pages: Vec::new(),
            errors: Vec::new(),
            options: options.clone(),
        }
    }
}

/// Job lifecycle state.
///
/// `Cancelled` is its own terminal state: a cancelled job produced no
/// artifacts, which is not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Cooperative cancellation flag shared between a job's caller and the
/// pipeline. The pipeline polls it after each page completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
