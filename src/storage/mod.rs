//! Durable storage for job records, input packages and activity entries.
//!
//! The storage system consists of:
//! - **store**: the `JobStore` trait, the single-writer transition API
//!   shared by the submitting flow and the completion callback
//! - **pg**: PostgreSQL implementation over sqlx, with a migration runner
//! - **memory**: in-memory implementation for tests and local runs

pub mod memory;
pub mod pg;
pub mod store;

// Re-export main types for convenience
pub use memory::MemoryJobStore;
pub use pg::{MigrationRunner, PgJobStore};
pub use store::{Activity, JobStore, StoreError};
