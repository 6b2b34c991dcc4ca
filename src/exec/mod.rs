//! External pipeline process execution.
//!
//! `launch` spawns the pipeline binary with combined stdout/stderr
//! redirected to a per-job log file and returns the live child handle
//! without waiting. Completion is observed by a [`CompletionDetector`]
//! task, one per job.

pub mod completion;

pub use completion::{CompletionDetector, JobCompletionListener};

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::info;

use crate::config::PipelineCommand;

/// Errors that can occur while launching or observing a process.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Creating the per-job log file failed.
    #[error("Failed to create log file '{path}': {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Spawning the external process failed. The caller must mark the job
    /// Failed and must not start a completion detector.
    #[error("Failed to spawn pipeline command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process had already terminated when the detector attached.
    /// Fatal for the job: no automatic status update will occur and the
    /// job remains InProgress until reconciled externally.
    #[error("Process for job {job_id} already exited before the completion detector attached")]
    AlreadyExited { job_id: i64 },

    /// Probing the child's state during detector attach failed.
    #[error("Failed to attach completion detector for job {job_id}: {source}")]
    Attach {
        job_id: i64,
        #[source]
        source: std::io::Error,
    },
}

/// Deterministic per-job log file path.
pub fn log_file_path(work_dir: &Path, study_id: &str, stamp: DateTime<Utc>) -> PathBuf {
    work_dir.join(format!("{}_{}.log", study_id, stamp.format("%Y%m%d%H%M%S")))
}

/// Spawns `command.program command.static_arg param_file` with combined
/// stdout/stderr appended to `log_path`.
///
/// Returns the live child handle immediately after spawn; never blocks on
/// process completion.
pub fn launch(
    command: &PipelineCommand,
    param_file: &Path,
    log_path: &Path,
) -> Result<Child, ExecError> {
    let log = std::fs::File::create(log_path).map_err(|source| ExecError::LogFile {
        path: log_path.display().to_string(),
        source,
    })?;
    let log_err = log.try_clone().map_err(|source| ExecError::LogFile {
        path: log_path.display().to_string(),
        source,
    })?;

    let child = Command::new(&command.program)
        .arg(&command.static_arg)
        .arg(param_file)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()
        .map_err(|source| ExecError::Spawn {
            command: command.program.clone(),
            source,
        })?;

    info!(
        program = %command.program,
        param_file = %param_file.display(),
        log = %log_path.display(),
        pid = child.id(),
        "Spawned pipeline process"
    );

    Ok(child)
}
