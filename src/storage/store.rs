//! The job store trait and the status-transition rules it enforces.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::job::{Job, JobStatus, NewJob};
use crate::pipeline::PipelineKind;
use crate::rawdata::InputDataPackage;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Job record not found.
    #[error("Job {0} not found")]
    JobNotFound(i64),

    /// The requested transition is not permitted by the state machine.
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    /// Serialization of an activity payload failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored record holds a value this build cannot interpret.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// A fire-and-forget audit entry (e.g. a package customization event).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub study_id: String,
    pub user_id: String,
    /// Short machine-readable kind, e.g. "raw_data_customized".
    pub kind: String,
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        study_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            study_id: study_id.into(),
            user_id: user_id.into(),
            kind: kind.into(),
            detail,
            recorded_at: Utc::now(),
        }
    }
}

/// Durable storage for jobs, input packages and activities.
///
/// All status mutation goes through the transition methods here; the
/// submitting flow and the completion callback are the only writers and
/// both use this API, so no locking beyond per-record updates is needed.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new job with status Waiting; returns the assigned id.
    async fn create_job(&self, new: &NewJob) -> Result<i64, StoreError>;

    async fn get_job(&self, job_id: i64) -> Result<Job, StoreError>;

    async fn list_jobs_for_study(&self, study_id: &str) -> Result<Vec<Job>, StoreError>;

    /// Waiting → InProgress, immediately after a successful spawn.
    async fn mark_in_progress(&self, job_id: i64) -> Result<(), StoreError>;

    /// InProgress → Completed, from the completion callback on exit 0.
    async fn mark_completed(
        &self,
        job_id: i64,
        complete_time: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// {Waiting, InProgress} → Failed. `complete_time` is None on the
    /// pre-execution path and Some on the execution path.
    async fn mark_failed(
        &self,
        job_id: i64,
        complete_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn insert_package(&self, package: &InputDataPackage) -> Result<(), StoreError>;

    /// Next serial number within (study, pipeline); starts at 1.
    async fn next_serial(
        &self,
        study_id: &str,
        pipeline: PipelineKind,
    ) -> Result<i32, StoreError>;

    async fn latest_package(
        &self,
        study_id: &str,
        pipeline: PipelineKind,
    ) -> Result<Option<InputDataPackage>, StoreError>;

    async fn find_package(
        &self,
        study_id: &str,
        pipeline: PipelineKind,
        serial: i32,
    ) -> Result<Option<InputDataPackage>, StoreError>;

    /// Fire-and-forget audit write.
    async fn record_activity(&self, activity: &Activity) -> Result<(), StoreError>;
}

/// Decides what a transition request means for the current status.
///
/// Returns `Ok(true)` when the transition should be applied, `Ok(false)`
/// for the terminal no-op case (logged as an anomaly; should not occur
/// under correct single-writer use), and an error for transitions the
/// state machine never permits.
pub(crate) fn check_transition(
    job_id: i64,
    current: JobStatus,
    target: JobStatus,
) -> Result<bool, StoreError> {
    if current.is_terminal() {
        warn!(
            job_id,
            current = %current,
            requested = %target,
            "Ignoring transition on terminal job"
        );
        return Ok(false);
    }

    if !current.can_transition_to(target) {
        return Err(StoreError::InvalidTransition {
            job_id,
            from: current,
            to: target,
        });
    }

    Ok(true)
}
