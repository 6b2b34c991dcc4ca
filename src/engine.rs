//! Submission orchestration and the job completion callback.
//!
//! `Engine::submit` drives the whole flow: resolve the input selection,
//! materialize the parameter file, insert the job record, spawn the
//! external process, transition to InProgress and attach a completion
//! detector. The engine itself is the detector's listener and performs the
//! terminal transition plus outcome notification when the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::exec::{self, CompletionDetector, ExecError, JobCompletionListener};
use crate::job::NewJob;
use crate::notify::{JobOutcome, Notifier};
use crate::params::{self, ParamError, ParamFileSpec, ProcessingParams};
use crate::pipeline::PipelineKind;
use crate::rawdata::{self, RawDataSelection, SelectError};
use crate::storage::{Activity, JobStore, StoreError};

/// Errors surfaced to the caller when a submission is rejected or fails
/// before execution begins.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The input-data selection was absent or invalid.
    #[error("Input selection error: {0}")]
    Select(#[from] SelectError),

    /// The parameter file could not be written. Nothing was persisted.
    #[error("Parameter file error: {0}")]
    Param(#[from] ParamError),

    /// A storage operation failed.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// The external process could not be spawned. The job record exists
    /// and has been marked Failed.
    #[error("Process launch error: {0}")]
    Launch(#[source] ExecError),
}

/// A validated, ready-to-run submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub study_id: String,
    pub owner_user_id: String,
    pub kind: PipelineKind,
    /// Genome annotation version, e.g. "hg38".
    pub annotation: String,
    /// The user's input-data choice; `None` is rejected.
    pub selection: Option<RawDataSelection>,
    pub processing: ProcessingParams,
}

/// What the caller gets back from an accepted submission.
pub struct SubmitOutcome {
    pub job_id: i64,
    /// Annotated filenames never received (informational, fresh uploads).
    pub missing_files: Vec<String>,
    /// Handle of the completion detector task. `None` when the detector
    /// could not attach (the process had already exited); in that case the
    /// job remains InProgress until reconciled externally.
    pub detector: Option<JoinHandle<()>>,
}

/// Holds a submission being assembled by the portal UI.
///
/// Cancelling only discards the in-memory request and clears the
/// readiness flag; it has no effect once `submit` has spawned the process.
#[derive(Default)]
pub struct SubmissionDraft {
    request: Option<SubmitRequest>,
    ready: bool,
}

impl SubmissionDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a validated request and marks the draft ready.
    pub fn stage(&mut self, request: SubmitRequest) {
        self.request = Some(request);
        self.ready = true;
    }

    /// Discards the staged request.
    pub fn cancel(&mut self) {
        self.request = None;
        self.ready = false;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Takes the staged request for submission, clearing the draft.
    pub fn take(&mut self) -> Option<SubmitRequest> {
        self.ready = false;
        self.request.take()
    }
}

/// The job lifecycle engine.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    notifier: Notifier,
}

impl Engine {
    pub fn new(config: EngineConfig, store: Arc<dyn JobStore>, notifier: Notifier) -> Self {
        Self {
            config,
            store,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Submits a job and returns as soon as the process is spawned.
    ///
    /// All completion handling runs on the detector's background task; the
    /// caller never blocks on process exit.
    pub async fn submit(self: &Arc<Self>, request: SubmitRequest) -> Result<SubmitOutcome, SubmitError> {
        let resolved = rawdata::resolve(request.selection.as_ref())?;
        let package = &resolved.package;

        if resolved.customized {
            // Fire-and-forget audit write; a failure must not block the job.
            let activity = Activity::new(
                &request.study_id,
                &request.owner_user_id,
                "raw_data_customized",
                serde_json::json!({
                    "package_serial": package.serial_number,
                    "excluded": resolved.excluded,
                }),
            );
            if let Err(e) = self.store.record_activity(&activity).await {
                warn!(study_id = %request.study_id, error = %e, "Failed to record customization activity");
            }
        }

        let stamp = Utc::now();
        self.ensure_work_dir()?;

        let output_path = self.stamped_path(&request.study_id, stamp, "output.txt");
        let detail_path = self.stamped_path(&request.study_id, stamp, "detail");
        let report_path = self.stamped_path(&request.study_id, stamp, "report.pdf");

        let spec = ParamFileSpec {
            study_id: request.study_id.clone(),
            annotation: request.annotation.clone(),
            kind: request.kind,
            input_path: package.filepath.display().to_string(),
            ctrl_file: package.ctrl_file.clone(),
            samples_annot_file: package.samples_annot_file.clone(),
            interval_file: package.interval_file.clone(),
            gtf_file: package.gtf_file.clone(),
            exclude_files: resolved.excluded.clone(),
            processing: request.processing.clone(),
            output_path: output_path.display().to_string(),
            report_path: report_path.display().to_string(),
        };

        let param_path =
            params::param_file_path(&self.config.work_dir, &request.study_id, request.kind, stamp);
        params::write_param_file(&param_path, &spec)?;

        let new_job = NewJob {
            study_id: request.study_id.clone(),
            owner_user_id: request.owner_user_id.clone(),
            pipeline: request.kind,
            submit_time: stamp,
            input_reference: package.serial_number,
            input_description: package.description.clone(),
            parameters: request.processing.summary(),
            output_file_path: output_path.display().to_string(),
            detail_output_path: detail_path.display().to_string(),
            report_path: report_path.display().to_string(),
        };
        let job_id = self.store.create_job(&new_job).await?;
        info!(job_id, study_id = %request.study_id, pipeline = %request.kind, "Job created");

        let command = self.config.command_for(request.kind);
        let log_path = exec::log_file_path(&self.config.work_dir, &request.study_id, stamp);
        let child = match exec::launch(command, &param_path, &log_path) {
            Ok(child) => child,
            Err(e) => {
                // Pre-execution failure: terminal Failed, no complete_time,
                // no detector, no outcome mail.
                if let Err(store_err) = self.store.mark_failed(job_id, None).await {
                    error!(job_id, error = %store_err, "Failed to mark job Failed after spawn error");
                }
                return Err(SubmitError::Launch(e));
            }
        };

        if let Err(e) = self.store.mark_in_progress(job_id).await {
            error!(
                job_id,
                error = %e,
                "Failed to mark job InProgress; process is running unsupervised"
            );
            if let Err(store_err) = self.store.mark_failed(job_id, None).await {
                error!(job_id, error = %store_err, "Failed to mark job Failed");
            }
            return Err(SubmitError::Store(e));
        }

        let listener: Arc<dyn JobCompletionListener> = self.clone();
        let detector = match CompletionDetector::start(
            job_id,
            request.study_id.clone(),
            child,
            listener,
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                // Known gap: the job stays InProgress with no automatic
                // resolution; flagged for external reconciliation.
                error!(
                    job_id,
                    study_id = %request.study_id,
                    error = %e,
                    "Completion detector could not attach; job will not resolve automatically"
                );
                None
            }
        };

        Ok(SubmitOutcome {
            job_id,
            missing_files: resolved.missing,
            detector,
        })
    }

    fn ensure_work_dir(&self) -> Result<(), ParamError> {
        std::fs::create_dir_all(&self.config.work_dir).map_err(|source| ParamError::WriteFailed {
            path: self.config.work_dir.display().to_string(),
            source,
        })
    }

    fn stamped_path(&self, study_id: &str, stamp: DateTime<Utc>, suffix: &str) -> PathBuf {
        self.config.work_dir.join(format!(
            "{}_{}_{}",
            study_id,
            stamp.format("%Y%m%d%H%M%S"),
            suffix
        ))
    }
}

#[async_trait]
impl JobCompletionListener for Engine {
    async fn on_finished(&self, job_id: i64, study_id: &str, exit_code: i32) {
        let complete_time = Utc::now();

        let (transition, outcome) = if exit_code == 0 {
            (
                self.store.mark_completed(job_id, complete_time).await,
                JobOutcome::Succeeded,
            )
        } else {
            (
                self.store.mark_failed(job_id, Some(complete_time)).await,
                JobOutcome::Failed { exit_code },
            )
        };

        if let Err(e) = transition {
            error!(job_id, study_id, error = %e, "Terminal transition failed");
            return;
        }

        match self.store.get_job(job_id).await {
            Ok(job) => self.notifier.notify(&job, outcome).await,
            Err(e) => error!(job_id, error = %e, "Could not load job for notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineCommand;
    use crate::notify::{RecordingMailer, StaticDirectory};
    use crate::rawdata::InputDataPackage;
    use crate::storage::MemoryJobStore;
    use std::path::Path;
    use tempfile::TempDir;

    fn package(dir: &Path) -> InputDataPackage {
        std::fs::write(
            dir.join("samples.txt"),
            "filename\tsample\na.cel\tS1\nb.cel\tS2\n",
        )
        .unwrap();
        std::fs::write(dir.join("a.cel"), "raw").unwrap();
        std::fs::write(dir.join("b.cel"), "raw").unwrap();

        InputDataPackage {
            study_id: "STU-1".to_string(),
            pipeline: PipelineKind::ExpressionArray,
            serial_number: 1,
            filepath: dir.to_path_buf(),
            description: "upload one".to_string(),
            upload_time: Utc::now(),
            owner_user_id: "user-1".to_string(),
            samples_annot_file: "samples.txt".to_string(),
            ctrl_file: String::new(),
            interval_file: String::new(),
            gtf_file: String::new(),
        }
    }

    fn engine(work_dir: &Path, program: &str, mailer: Arc<RecordingMailer>) -> Arc<Engine> {
        let config = EngineConfig::default()
            .with_work_dir(work_dir)
            .with_default_command(PipelineCommand::new(program, "-c"));
        let store = Arc::new(MemoryJobStore::new());
        let directory = Arc::new(StaticDirectory::new().with_user("user-1", "owner@example.org"));
        let notifier = Notifier::new(
            mailer,
            directory,
            "portal@example.org",
            vec!["support@example.org".to_string()],
        )
        .unwrap();
        Arc::new(Engine::new(config, store, notifier))
    }

    fn request(dir: &Path) -> SubmitRequest {
        SubmitRequest {
            study_id: "STU-1".to_string(),
            owner_user_id: "user-1".to_string(),
            kind: PipelineKind::ExpressionArray,
            annotation: "hg38".to_string(),
            selection: Some(RawDataSelection::FreshUpload {
                package: package(dir),
            }),
            processing: ProcessingParams {
                normalization: "rma".to_string(),
                summarization: "median".to_string(),
                read_depth: 0,
                variant_depth: 0,
                exclude_db: false,
            },
        }
    }

    #[tokio::test]
    async fn test_no_selection_is_rejected_before_any_record() {
        let work = TempDir::new().unwrap();
        let mailer = Arc::new(RecordingMailer::new());
        let engine = engine(work.path(), "sh", mailer);

        let mut req = request(work.path());
        req.selection = None;

        let result = engine.submit(req).await;
        assert!(matches!(
            result,
            Err(SubmitError::Select(SelectError::NoSelection))
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_failed_without_detector() {
        let data = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let mailer = Arc::new(RecordingMailer::new());
        let engine = engine(work.path(), "no-such-pipeline-binary", mailer.clone());

        let result = engine.submit(request(data.path())).await;
        assert!(matches!(result, Err(SubmitError::Launch(_))));

        let jobs = engine
            .store()
            .list_jobs_for_study("STU-1")
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, crate::job::JobStatus::Failed);
        assert!(jobs[0].complete_time.is_none());
        // No outcome mail on the pre-execution path
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_draft_cancel_resets_readiness() {
        let work = TempDir::new().unwrap();
        let mut draft = SubmissionDraft::new();
        assert!(!draft.is_ready());

        draft.stage(request(work.path()));
        assert!(draft.is_ready());

        draft.cancel();
        assert!(!draft.is_ready());
        assert!(draft.take().is_none());
    }
}
