//! Text-only mode: file-level cache in front of the remote extraction
//! service, with no renderer or worker pool involved.

mod common;

use common::*;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use textmill::{CancelFlag, JobOptions, JobStatus, Mode};

fn text_options() -> JobOptions {
    JobOptions {
        mode: Mode::Text,
        ..JobOptions::default()
    }
}

fn write_document(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("report.pdf");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"%PDF-1.4 fake document body").unwrap();
    path
}

#[tokio::test]
async fn test_text_mode_extracts_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let document = write_document(dir.path());

    let extractor = Arc::new(StubExtractor::new("hello from the extraction service"));
    let (pipeline, store) = build_pipeline(
        settings,
        Arc::new(StubRenderer::new(1)),
        Arc::new(ScriptedEngine::new()),
        extractor.clone(),
    );

    pipeline
        .run_job("text-1", &document, &text_options(), &CancelFlag::new())
        .await;

    let record = store.get("text-1").unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.progress, 100);
    assert_eq!(extractor.calls(), 1);

    let output = read_output(&store, "text-1");
    assert_eq!(output.final_text, "hello from the extraction service");
    assert_eq!(output.extracted_text, output.final_text);
    assert!(output.pages.is_empty());
    assert!(output.metadata.contains_key("Content-Type"));

    let text_artifact = store.get("text-1").unwrap().artifacts.unwrap().text_path;
    assert_eq!(
        std::fs::read_to_string(text_artifact).unwrap(),
        "hello from the extraction service"
    );
}

#[tokio::test]
async fn test_text_mode_second_run_hits_file_cache() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let document = write_document(dir.path());

    let extractor = Arc::new(StubExtractor::new("cached text"));
    let (pipeline, store) = build_pipeline(
        settings,
        Arc::new(StubRenderer::new(1)),
        Arc::new(ScriptedEngine::new()),
        extractor.clone(),
    );

    pipeline
        .run_job("text-a", &document, &text_options(), &CancelFlag::new())
        .await;
    pipeline
        .run_job("text-b", &document, &text_options(), &CancelFlag::new())
        .await;

    assert_eq!(extractor.calls(), 1, "second run must skip the remote service");
    let output = read_output(&store, "text-b");
    assert_eq!(output.final_text, "cached text");

    let stats = pipeline.cache().unwrap().stats().unwrap();
    assert_eq!(stats.file_entries, 1);
    assert_eq!(stats.file_hits, 1);
}

#[tokio::test]
async fn test_text_mode_remote_failure_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let result_dir = settings.result_dir.clone();
    let document = write_document(dir.path());

    let extractor = Arc::new(StubExtractor::failing("unused"));
    let (pipeline, store) = build_pipeline(
        settings,
        Arc::new(StubRenderer::new(1)),
        Arc::new(ScriptedEngine::new()),
        extractor.clone(),
    );

    pipeline
        .run_job("text-fail", &document, &text_options(), &CancelFlag::new())
        .await;

    let record = store.get("text-fail").unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.unwrap().contains("stub extraction outage"));
    assert!(record.artifacts.is_none());
    assert!(!result_dir.join("text-fail.json").exists());

    // The failure must not be cached: a retry reaches the service again.
    extractor.fail.store(false, Ordering::SeqCst);
    pipeline
        .run_job("text-retry", &document, &text_options(), &CancelFlag::new())
        .await;
    assert_eq!(extractor.calls(), 2);
    assert_eq!(store.get("text-retry").unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_text_mode_missing_file_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());

    let (pipeline, store) = build_pipeline(
        settings,
        Arc::new(StubRenderer::new(1)),
        Arc::new(ScriptedEngine::new()),
        Arc::new(StubExtractor::new("unused")),
    );

    pipeline
        .run_job(
            "text-missing",
            "does-not-exist.pdf".as_ref(),
            &text_options(),
            &CancelFlag::new(),
        )
        .await;

    assert_eq!(store.get("text-missing").unwrap().status, JobStatus::Failed);
}
