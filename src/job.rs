//! Job records and the job status state machine.
//!
//! A `Job` tracks one submitted pipeline execution from insertion
//! (`Waiting`) through process launch (`InProgress`) to a terminal outcome
//! (`Completed` or `Failed`). Status only ever moves forward; the store
//! treats a transition attempted on a terminal job as a logged no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineKind;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Inserted but the external process has not been spawned yet.
    Waiting,
    /// The external process is running.
    InProgress,
    /// The process exited with code 0.
    Completed,
    /// Pre-execution failure or nonzero exit.
    Failed,
}

impl JobStatus {
    /// Stable code used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parses a storage code back into a status.
    pub fn from_str_code(code: &str) -> Option<Self> {
        match code {
            "waiting" => Some(JobStatus::Waiting),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Waiting → InProgress, Waiting → Failed (pre-execution failure),
    /// InProgress → Completed, InProgress → Failed. Nothing leaves a
    /// terminal state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Waiting, JobStatus::InProgress) => true,
            (JobStatus::Waiting, JobStatus::Failed) => true,
            (JobStatus::InProgress, JobStatus::Completed) => true,
            (JobStatus::InProgress, JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insert payload for a new job. The id is assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub study_id: String,
    pub owner_user_id: String,
    pub pipeline: PipelineKind,
    pub submit_time: DateTime<Utc>,
    /// Serial number of the resolved input-data package.
    pub input_reference: i32,
    pub input_description: String,
    /// Flattened key/value summary of the processing parameters.
    pub parameters: String,
    pub output_file_path: String,
    pub detail_output_path: String,
    pub report_path: String,
}

/// One tracked pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Assigned by the store on insert; immutable afterwards.
    pub id: i64,
    pub study_id: String,
    pub owner_user_id: String,
    pub pipeline: PipelineKind,
    pub status: JobStatus,
    pub submit_time: DateTime<Utc>,
    /// Set if and only if the job reached a terminal state through the
    /// execution path. Pre-execution failures leave it unset.
    pub complete_time: Option<DateTime<Utc>>,
    pub input_reference: i32,
    pub input_description: String,
    pub parameters: String,
    pub output_file_path: String,
    pub detail_output_path: String,
    pub report_path: String,
}

impl Job {
    /// Builds the stored record for a freshly inserted job.
    pub fn from_new(id: i64, new: &NewJob) -> Self {
        Self {
            id,
            study_id: new.study_id.clone(),
            owner_user_id: new.owner_user_id.clone(),
            pipeline: new.pipeline,
            status: JobStatus::Waiting,
            submit_time: new.submit_time,
            complete_time: None,
            input_reference: new.input_reference,
            input_description: new.input_description.clone(),
            parameters: new.parameters.clone(),
            output_file_path: new.output_file_path.clone(),
            detail_output_path: new.detail_output_path.clone(),
            report_path: new.report_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job() -> NewJob {
        NewJob {
            study_id: "STU-1".to_string(),
            owner_user_id: "user-1".to_string(),
            pipeline: PipelineKind::ExpressionArray,
            submit_time: Utc::now(),
            input_reference: 1,
            input_description: "first upload".to_string(),
            parameters: "NORMALIZATION=rma".to_string(),
            output_file_path: "/out/result.txt".to_string(),
            detail_output_path: "/out/detail".to_string(),
            report_path: "/out/report.pdf".to_string(),
        }
    }

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(JobStatus::Waiting.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::Waiting.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        for terminal in [JobStatus::Completed, JobStatus::Failed] {
            assert!(terminal.is_terminal());
            for next in [
                JobStatus::Waiting,
                JobStatus::InProgress,
                JobStatus::Completed,
                JobStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_no_backward_or_skipping_transitions() {
        assert!(!JobStatus::Waiting.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Waiting.can_transition_to(JobStatus::Waiting));
        assert!(!JobStatus::InProgress.can_transition_to(JobStatus::Waiting));
        assert!(!JobStatus::InProgress.can_transition_to(JobStatus::InProgress));
    }

    #[test]
    fn test_status_code_round_trip() {
        for status in [
            JobStatus::Waiting,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str_code(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::from_str_code("finalizing"), None);
    }

    #[test]
    fn test_from_new_starts_waiting() {
        let job = Job::from_new(42, &new_job());
        assert_eq!(job.id, 42);
        assert_eq!(job.status, JobStatus::Waiting);
        assert!(job.complete_time.is_none());
        assert_eq!(job.input_reference, 1);
    }
}
