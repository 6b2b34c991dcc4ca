//! PostgreSQL job store.
//!
//! Backs the `JobStore` trait with sqlx over a connection pool. Schema is
//! managed by an embedded, idempotent migration runner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::path::PathBuf;

use crate::job::{Job, JobStatus, NewJob};
use crate::pipeline::PipelineKind;
use crate::rawdata::InputDataPackage;

use super::store::{check_transition, Activity, JobStore, StoreError};

/// Schema statements, applied in order. Each is idempotent.
const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id BIGSERIAL PRIMARY KEY,
        study_id TEXT NOT NULL,
        owner_user_id TEXT NOT NULL,
        pipeline TEXT NOT NULL,
        status TEXT NOT NULL,
        submit_time TIMESTAMPTZ NOT NULL,
        complete_time TIMESTAMPTZ,
        input_reference INTEGER NOT NULL,
        input_description TEXT NOT NULL,
        parameters TEXT NOT NULL,
        output_file_path TEXT NOT NULL,
        detail_output_path TEXT NOT NULL,
        report_path TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_study ON jobs (study_id)",
    r#"
    CREATE TABLE IF NOT EXISTS input_packages (
        study_id TEXT NOT NULL,
        pipeline TEXT NOT NULL,
        serial_number INTEGER NOT NULL,
        filepath TEXT NOT NULL,
        description TEXT NOT NULL,
        upload_time TIMESTAMPTZ NOT NULL,
        owner_user_id TEXT NOT NULL,
        samples_annot_file TEXT NOT NULL,
        ctrl_file TEXT NOT NULL,
        interval_file TEXT NOT NULL,
        gtf_file TEXT NOT NULL,
        PRIMARY KEY (study_id, pipeline, serial_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS activities (
        id UUID PRIMARY KEY,
        study_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        detail JSONB NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Migration runner for applying schema changes.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending migrations. Idempotent.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for (idx, statement) in SCHEMA_STATEMENTS.iter().enumerate() {
            let name = format!("schema_v1_part_{idx}");
            if !self.is_applied(&name).await? {
                self.apply(&name, statement).await?;
            }
        }

        Ok(())
    }

    async fn is_applied(&self, name: &str) -> Result<bool, StoreError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn apply(&self, name: &str, sql: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;

        sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

/// PostgreSQL-backed job store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Connects to the database and returns a new store.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Creates a store from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        MigrationRunner::new(self.pool.clone()).run_migrations().await
    }

    async fn current_status(&self, job_id: i64) -> Result<JobStatus, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        let (code,) = row.ok_or(StoreError::JobNotFound(job_id))?;
        JobStatus::from_str_code(&code)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown job status '{code}'")))
    }

    async fn transition(
        &self,
        job_id: i64,
        target: JobStatus,
        complete_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let current = self.current_status(job_id).await?;
        if !check_transition(job_id, current, target)? {
            return Ok(());
        }

        // Guard on the expected current status so the update is a no-op
        // if another writer got there first.
        sqlx::query("UPDATE jobs SET status = $1, complete_time = $2 WHERE id = $3 AND status = $4")
            .bind(target.as_str())
            .bind(complete_time)
            .bind(job_id)
            .bind(current.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let pipeline_code: String = row.try_get("pipeline")?;
    let pipeline = PipelineKind::from_code(&pipeline_code)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown pipeline '{pipeline_code}'")))?;

    let status_code: String = row.try_get("status")?;
    let status = JobStatus::from_str_code(&status_code)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown job status '{status_code}'")))?;

    Ok(Job {
        id: row.try_get("id")?,
        study_id: row.try_get("study_id")?,
        owner_user_id: row.try_get("owner_user_id")?,
        pipeline,
        status,
        submit_time: row.try_get("submit_time")?,
        complete_time: row.try_get("complete_time")?,
        input_reference: row.try_get("input_reference")?,
        input_description: row.try_get("input_description")?,
        parameters: row.try_get("parameters")?,
        output_file_path: row.try_get("output_file_path")?,
        detail_output_path: row.try_get("detail_output_path")?,
        report_path: row.try_get("report_path")?,
    })
}

fn package_from_row(row: &PgRow) -> Result<InputDataPackage, StoreError> {
    let pipeline_code: String = row.try_get("pipeline")?;
    let pipeline = PipelineKind::from_code(&pipeline_code)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown pipeline '{pipeline_code}'")))?;

    let filepath: String = row.try_get("filepath")?;

    Ok(InputDataPackage {
        study_id: row.try_get("study_id")?,
        pipeline,
        serial_number: row.try_get("serial_number")?,
        filepath: PathBuf::from(filepath),
        description: row.try_get("description")?,
        upload_time: row.try_get("upload_time")?,
        owner_user_id: row.try_get("owner_user_id")?,
        samples_annot_file: row.try_get("samples_annot_file")?,
        ctrl_file: row.try_get("ctrl_file")?,
        interval_file: row.try_get("interval_file")?,
        gtf_file: row.try_get("gtf_file")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, new: &NewJob) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO jobs (
                study_id, owner_user_id, pipeline, status, submit_time,
                input_reference, input_description, parameters,
                output_file_path, detail_output_path, report_path
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(&new.study_id)
        .bind(&new.owner_user_id)
        .bind(new.pipeline.code())
        .bind(JobStatus::Waiting.as_str())
        .bind(new.submit_time)
        .bind(new.input_reference)
        .bind(&new.input_description)
        .bind(&new.parameters)
        .bind(&new.output_file_path)
        .bind(&new.detail_output_path)
        .bind(&new.report_path)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn get_job(&self, job_id: i64) -> Result<Job, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::JobNotFound(job_id))?;

        job_from_row(&row)
    }

    async fn list_jobs_for_study(&self, study_id: &str) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE study_id = $1 ORDER BY id")
            .bind(study_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn mark_in_progress(&self, job_id: i64) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::InProgress, None).await
    }

    async fn mark_completed(
        &self,
        job_id: i64,
        complete_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::Completed, Some(complete_time))
            .await
    }

    async fn mark_failed(
        &self,
        job_id: i64,
        complete_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::Failed, complete_time)
            .await
    }

    async fn insert_package(&self, package: &InputDataPackage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO input_packages (
                study_id, pipeline, serial_number, filepath, description,
                upload_time, owner_user_id, samples_annot_file, ctrl_file,
                interval_file, gtf_file
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&package.study_id)
        .bind(package.pipeline.code())
        .bind(package.serial_number)
        .bind(package.filepath.display().to_string())
        .bind(&package.description)
        .bind(package.upload_time)
        .bind(&package.owner_user_id)
        .bind(&package.samples_annot_file)
        .bind(&package.ctrl_file)
        .bind(&package.interval_file)
        .bind(&package.gtf_file)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn next_serial(
        &self,
        study_id: &str,
        pipeline: PipelineKind,
    ) -> Result<i32, StoreError> {
        let row: (i32,) = sqlx::query_as(
            "SELECT COALESCE(MAX(serial_number), 0) + 1 FROM input_packages \
             WHERE study_id = $1 AND pipeline = $2",
        )
        .bind(study_id)
        .bind(pipeline.code())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn latest_package(
        &self,
        study_id: &str,
        pipeline: PipelineKind,
    ) -> Result<Option<InputDataPackage>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM input_packages WHERE study_id = $1 AND pipeline = $2 \
             ORDER BY serial_number DESC LIMIT 1",
        )
        .bind(study_id)
        .bind(pipeline.code())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(package_from_row).transpose()
    }

    async fn find_package(
        &self,
        study_id: &str,
        pipeline: PipelineKind,
        serial: i32,
    ) -> Result<Option<InputDataPackage>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM input_packages WHERE study_id = $1 AND pipeline = $2 \
             AND serial_number = $3",
        )
        .bind(study_id)
        .bind(pipeline.code())
        .bind(serial)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(package_from_row).transpose()
    }

    async fn record_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO activities (id, study_id, user_id, kind, detail, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(activity.id)
        .bind(&activity.study_id)
        .bind(&activity.user_id)
        .bind(&activity.kind)
        .bind(&activity.detail)
        .bind(activity.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
