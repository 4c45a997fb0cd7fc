//! Job status reporting and result persistence.
//!
//! The job store is fire-and-forget: it is how callers observe a job, not
//! part of the pipeline's correctness path. Implementations log failures
//! and move on rather than propagating them into the job.

use crate::error::Result;
use crate::types::{JobOutput, JobStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Paths of the artifacts persisted for a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobArtifacts {
    pub json_path: PathBuf,
    pub text_path: PathBuf,
}

/// Sink for job status and progress updates.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Record job progress, 0-100. Non-decreasing within a run.
    async fn update_progress(&self, job_id: &str, progress: u8);

    /// Record a status transition, optionally with an error message and the
    /// persisted artifact paths.
    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
        artifacts: Option<JobArtifacts>,
    );
}

/// One job's observable state in the in-memory store.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub artifacts: Option<JobArtifacts>,
}

impl Default for JobRecord {
    fn default() -> Self {
        Self {
            status: JobStatus::Queued,
            progress: 0,
            error: None,
            artifacts: None,
        }
    }
}

/// In-memory job store for embedding, the CLI, and tests.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        match self.jobs.lock() {
            Ok(jobs) => jobs.get(job_id).cloned(),
            Err(_) => None,
        }
    }

    fn with_record<F: FnOnce(&mut JobRecord)>(&self, job_id: &str, apply: F) {
        match self.jobs.lock() {
            Ok(mut jobs) => apply(jobs.entry(job_id.to_string()).or_default()),
            Err(err) => {
                tracing::warn!("Job store lock poisoned, dropping update: {}", err);
            }
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn update_progress(&self, job_id: &str, progress: u8) {
        self.with_record(job_id, |record| {
            record.progress = record.progress.max(progress.min(100));
        });
    }

    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
        artifacts: Option<JobArtifacts>,
    ) {
        self.with_record(job_id, |record| {
            record.status = status;
            if error.is_some() {
                record.error = error;
            }
            if artifacts.is_some() {
                record.artifacts = artifacts;
            }
        });
    }
}

/// Write a job's result artifacts: the full output as JSON and the final
/// text as plain text.
pub async fn persist_output(result_dir: &Path, output: &JobOutput) -> Result<JobArtifacts> {
    tokio::fs::create_dir_all(result_dir).await?;

    let json_path = result_dir.join(format!("{}.json", output.job_id));
    let text_path = result_dir.join(format!("{}.txt", output.job_id));

    let json = serde_json::to_vec_pretty(output)?;
    tokio::fs::write(&json_path, json).await?;
    tokio::fs::write(&text_path, output.final_text.as_bytes()).await?;

    Ok(JobArtifacts { json_path, text_path })
}
