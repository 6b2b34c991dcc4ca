//! In-memory job store for tests and local experiments.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::job::{Job, JobStatus, NewJob};
use crate::pipeline::PipelineKind;
use crate::rawdata::InputDataPackage;

use super::store::{check_transition, Activity, JobStore, StoreError};

#[derive(Default)]
struct Inner {
    next_id: i64,
    jobs: BTreeMap<i64, Job>,
    packages: Vec<InputDataPackage>,
    activities: Vec<Activity>,
}

/// A `JobStore` held entirely in memory. Ids are monotonically increasing.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded activities, for assertions.
    pub fn activities(&self) -> Vec<Activity> {
        self.inner.lock().unwrap().activities.clone()
    }

    /// Snapshot of all jobs, for assertions.
    pub fn jobs(&self) -> Vec<Job> {
        self.inner.lock().unwrap().jobs.values().cloned().collect()
    }

    fn transition(
        &self,
        job_id: i64,
        target: JobStatus,
        complete_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))?;

        if check_transition(job_id, job.status, target)? {
            job.status = target;
            job.complete_time = complete_time;
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, new: &NewJob) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.jobs.insert(id, Job::from_new(id, new));
        Ok(id)
    }

    async fn get_job(&self, job_id: i64) -> Result<Job, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::JobNotFound(job_id))
    }

    async fn list_jobs_for_study(&self, study_id: &str) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .jobs
            .values()
            .filter(|job| job.study_id == study_id)
            .cloned()
            .collect())
    }

    async fn mark_in_progress(&self, job_id: i64) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::InProgress, None)
    }

    async fn mark_completed(
        &self,
        job_id: i64,
        complete_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::Completed, Some(complete_time))
    }

    async fn mark_failed(
        &self,
        job_id: i64,
        complete_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::Failed, complete_time)
    }

    async fn insert_package(&self, package: &InputDataPackage) -> Result<(), StoreError> {
        self.inner.lock().unwrap().packages.push(package.clone());
        Ok(())
    }

    async fn next_serial(
        &self,
        study_id: &str,
        pipeline: PipelineKind,
    ) -> Result<i32, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .packages
            .iter()
            .filter(|p| p.study_id == study_id && p.pipeline == pipeline)
            .map(|p| p.serial_number)
            .max()
            .unwrap_or(0)
            + 1)
    }

    async fn latest_package(
        &self,
        study_id: &str,
        pipeline: PipelineKind,
    ) -> Result<Option<InputDataPackage>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .packages
            .iter()
            .filter(|p| p.study_id == study_id && p.pipeline == pipeline)
            .max_by_key(|p| p.serial_number)
            .cloned())
    }

    async fn find_package(
        &self,
        study_id: &str,
        pipeline: PipelineKind,
        serial: i32,
    ) -> Result<Option<InputDataPackage>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .packages
            .iter()
            .find(|p| {
                p.study_id == study_id && p.pipeline == pipeline && p.serial_number == serial
            })
            .cloned())
    }

    async fn record_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        self.inner.lock().unwrap().activities.push(activity.clone());
        Ok(())
    }
}
