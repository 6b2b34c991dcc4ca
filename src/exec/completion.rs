//! Completion detection for launched pipeline processes.
//!
//! One detector task is started per launched process. It suspends on the
//! process-exit wait, never on the submitting thread, and invokes the
//! registered listener exactly once with the exit code. Tasks are fully
//! independent and share no mutable state.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::ExecError;

/// Callback invoked exactly once when a job's process exits.
///
/// Exit code 0 is the success path; any nonzero code is the failure path.
#[async_trait]
pub trait JobCompletionListener: Send + Sync {
    async fn on_finished(&self, job_id: i64, study_id: &str, exit_code: i32);
}

/// Background observer for one launched process.
pub struct CompletionDetector;

impl CompletionDetector {
    /// Starts a detector task for `child`.
    ///
    /// Fails with [`ExecError::AlreadyExited`] if the process terminated in
    /// the narrow window between spawn and attach. That condition is fatal
    /// for the job: no detector runs, no status update will ever arrive,
    /// and the job remains InProgress until reconciled externally. Callers
    /// must log it distinctly.
    pub fn start(
        job_id: i64,
        study_id: String,
        mut child: Child,
        listener: Arc<dyn JobCompletionListener>,
    ) -> Result<JoinHandle<()>, ExecError> {
        match child.try_wait() {
            Ok(Some(_)) => return Err(ExecError::AlreadyExited { job_id }),
            Ok(None) => {}
            Err(source) => return Err(ExecError::Attach { job_id, source }),
        }

        let handle = tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => exit_code_of(status),
                Err(e) => {
                    // The process was spawned, so something must reach the
                    // listener; report a conventional failure code.
                    error!(job_id, error = %e, "Waiting on pipeline process failed");
                    -1
                }
            };

            info!(job_id, study_id = %study_id, exit_code, "Pipeline process exited");
            listener.on_finished(job_id, &study_id, exit_code).await;
        });

        Ok(handle)
    }
}

/// Maps an exit status to a single code. Signal-terminated children have
/// no code on Unix; report the conventional 128 + signal instead.
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
