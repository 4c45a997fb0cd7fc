//! textmill command-line interface.
//!
//! Runs a single extraction job against the local pipeline and prints the
//! result, plus small cache maintenance commands.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use textmill::{
    open_cache, CancelFlag, ExtractionClient, JobOptions, JobStatus, MemoryJobStore, Mode,
    Pipeline, PreprocessProfile, RenderBackend, ResultCache, Settings,
};

#[derive(Parser)]
#[command(name = "textmill", version, about = "Extract text from scanned documents")]
struct Cli {
    /// Path to a TOML settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an extraction job on a file.
    Extract {
        /// Input document (PDF or image).
        file: PathBuf,

        /// Processing mode: text, ocr, or both.
        #[arg(long, default_value = "both")]
        mode: String,

        /// OCR engine name.
        #[arg(long, default_value = "tesseract")]
        engine: String,

        /// Recognition language code.
        #[arg(long, default_value = "eng")]
        lang: String,

        /// Page segmentation mode.
        #[arg(long, default_value_t = 6)]
        psm: u8,

        /// OCR engine mode.
        #[arg(long, default_value_t = 1)]
        oem: u8,

        /// Preprocessing profile: none, standard, or aggressive.
        #[arg(long, default_value = "standard")]
        preprocess: String,

        /// Render resolution override.
        #[arg(long)]
        dpi: Option<u32>,

        /// Output format: text or json.
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Result cache maintenance.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Print entry and hit counts for both cache tables.
    Stats,
    /// Delete every cached entry.
    Clear,
}

/// Fallback backend for builds or hosts without a usable pdfium library.
/// Image inputs still work; PDF rendering reports a clear error.
struct UnavailableRenderer;

impl RenderBackend for UnavailableRenderer {
    fn page_count(&self, _path: &Path) -> usize {
        0
    }

    fn render_range(
        &self,
        _path: &Path,
        _first_page: usize,
        _last_page: usize,
        _dpi: u32,
    ) -> textmill::Result<Vec<image::DynamicImage>> {
        Err(textmill::TextmillError::rendering(
            "PDF rendering unavailable: pdfium library not found",
        ))
    }

    fn render_all(&self, _path: &Path, _dpi: u32) -> textmill::Result<Vec<image::DynamicImage>> {
        self.render_range(_path, 0, 0, _dpi)
    }
}

fn build_renderer() -> Arc<dyn RenderBackend> {
    match textmill::render::pdfium::PdfiumRenderer::new() {
        Ok(renderer) => Arc::new(renderer),
        Err(err) => {
            tracing::warn!("pdfium unavailable, PDF inputs will fail: {}", err);
            Arc::new(UnavailableRenderer)
        }
    }
}

fn load_settings(config: Option<&PathBuf>) -> anyhow::Result<Settings> {
    match config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(Settings::load()),
    }
}

fn open_cache_or_fail(settings: &Settings) -> anyhow::Result<ResultCache> {
    ResultCache::open(
        &settings.cache.path,
        settings.cache.max_page_entries,
        settings.cache.max_file_entries,
    )
    .with_context(|| format!("Failed to open cache at {}", settings.cache.path.display()))
}

async fn run_extract(
    settings: Settings,
    file: PathBuf,
    options: JobOptions,
    format: &str,
) -> anyhow::Result<()> {
    if !file.exists() {
        bail!("Input file not found: {}", file.display());
    }

    let cache = open_cache(&settings);
    let renderer = build_renderer();
    let extractor = Arc::new(
        ExtractionClient::new(&settings.extraction_url, settings.extraction_timeout())
            .context("Failed to build extraction client")?,
    );
    let store = Arc::new(MemoryJobStore::new());

    let pipeline = Pipeline::new(
        settings,
        cache,
        renderer,
        extractor,
        textmill::engine_registry(),
        store.clone(),
    );

    let job_id = uuid::Uuid::new_v4().to_string();
    pipeline
        .run_job(&job_id, &file, &options, &CancelFlag::new())
        .await;

    let record = store
        .get(&job_id)
        .context("Job left no record in the store")?;

    match record.status {
        JobStatus::Completed => {
            let artifacts = record.artifacts.context("Completed job has no artifacts")?;
            let output = std::fs::read_to_string(&artifacts.json_path)
                .with_context(|| format!("Failed to read {}", artifacts.json_path.display()))?;

            if format == "json" {
                println!("{}", output);
            } else {
                let parsed: textmill::JobOutput = serde_json::from_str(&output)?;
                let text = if parsed.final_text.is_empty() {
                    parsed.ocr_text
                } else {
                    parsed.final_text
                };
                println!("{}", text);
                for error in &parsed.errors {
                    eprintln!("warning: {}", error);
                }
            }
            Ok(())
        }
        JobStatus::Failed => {
            bail!("Job failed: {}", record.error.unwrap_or_else(|| "unknown error".to_string()))
        }
        status => bail!("Job ended in unexpected state: {}", status.as_str()),
    }
}

fn run_cache(settings: Settings, command: CacheCommand) -> anyhow::Result<()> {
    let cache = open_cache_or_fail(&settings)?;

    match command {
        CacheCommand::Stats => {
            let stats = cache.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        CacheCommand::Clear => {
            let (pages, files) = cache.clear()?;
            println!("Removed {} page entries and {} file entries", pages, files);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings(cli.config.as_ref())?;

    match cli.command {
        Command::Extract {
            file,
            mode,
            engine,
            lang,
            psm,
            oem,
            preprocess,
            dpi,
            format,
        } => {
            let options = JobOptions {
                mode: Mode::parse(&mode).map_err(anyhow::Error::msg)?,
                engine,
                language: lang,
                psm,
                oem,
                preprocess: PreprocessProfile::parse(&preprocess).map_err(anyhow::Error::msg)?,
                dpi,
            };
            run_extract(settings, file, options, &format).await
        }
        Command::Cache { command } => run_cache(settings, command),
    }
}
