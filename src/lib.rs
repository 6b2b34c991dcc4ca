//! genoflow: pipeline job lifecycle engine for a clinical-data portal.
//!
//! This library turns a validated pipeline submission into a durable job
//! record, materializes the parameter file read by the external pipeline
//! binary, launches that binary, detects its completion on a background
//! task, transitions job status and dispatches outcome notifications.

// Core modules
pub mod cli;
pub mod config;
pub mod engine;
pub mod exec;
pub mod job;
pub mod notify;
pub mod params;
pub mod pipeline;
pub mod rawdata;
pub mod storage;

// Re-export the types most callers touch
pub use config::EngineConfig;
pub use engine::{Engine, SubmitError, SubmitOutcome, SubmitRequest};
pub use job::{Job, JobStatus, NewJob};
pub use pipeline::PipelineKind;
