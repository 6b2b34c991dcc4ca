//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::{Engine, SubmitRequest};
use crate::notify::{LogMailer, Notifier, StaticDirectory};
use crate::params::ProcessingParams;
use crate::pipeline::PipelineKind;
use crate::rawdata::{InputDataPackage, RawDataSelection};
use crate::storage::{JobStore, PgJobStore};

/// Pipeline job lifecycle engine.
#[derive(Debug, Parser)]
#[command(name = "genoflow", version, about)]
pub struct Cli {
    /// Log level when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Submit a pipeline job.
    Submit {
        #[arg(long)]
        study: String,
        #[arg(long)]
        owner: String,
        /// Email address of the owner, for outcome notifications.
        #[arg(long)]
        owner_email: String,
        /// Pipeline kind code (e.g. expression_array, variant_seq).
        #[arg(long)]
        pipeline: String,
        /// Genome annotation version.
        #[arg(long, default_value = "hg38")]
        annotation: String,
        /// Directory with freshly uploaded raw data. Mutually exclusive
        /// with --serial.
        #[arg(long, conflicts_with = "serial")]
        upload_dir: Option<PathBuf>,
        /// Description stored with a fresh upload.
        #[arg(long, default_value = "")]
        description: String,
        /// Serial number of a previously uploaded package to reuse.
        #[arg(long)]
        serial: Option<i32>,
        /// Raw filename to exclude from a reused package (repeatable).
        #[arg(long = "exclude")]
        excluded: Vec<String>,
        /// Sample annotation filename within the package directory.
        #[arg(long, default_value = "samples.txt")]
        samples_annot_file: String,
        #[arg(long, default_value = "")]
        ctrl_file: String,
        #[arg(long, default_value = "")]
        interval_file: String,
        #[arg(long, default_value = "")]
        gtf_file: String,
        #[arg(long, default_value = "quantile")]
        normalization: String,
        #[arg(long, default_value = "median")]
        summarization: String,
        #[arg(long, default_value_t = 0)]
        read_depth: u32,
        #[arg(long, default_value_t = 0)]
        variant_depth: u32,
        #[arg(long)]
        exclude_db: bool,
        /// Stay attached until the pipeline process exits.
        #[arg(long)]
        wait: bool,
    },
    /// Show one job.
    Status {
        job_id: i64,
    },
    /// List all jobs of a study.
    List {
        study: String,
    },
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the parsed command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = EngineConfig::from_env().context("loading engine configuration")?;

    let store = PgJobStore::connect(&config.database_url)
        .await
        .context("connecting to job store")?;
    store.run_migrations().await.context("running migrations")?;
    let store: Arc<dyn JobStore> = Arc::new(store);

    match cli.command {
        Commands::Submit {
            study,
            owner,
            owner_email,
            pipeline,
            annotation,
            upload_dir,
            description,
            serial,
            excluded,
            samples_annot_file,
            ctrl_file,
            interval_file,
            gtf_file,
            normalization,
            summarization,
            read_depth,
            variant_depth,
            exclude_db,
            wait,
        } => {
            let kind = PipelineKind::from_code(&pipeline)
                .with_context(|| format!("unknown pipeline kind '{pipeline}'"))?;

            let selection = match (upload_dir, serial) {
                (Some(dir), None) => {
                    // Register the fresh upload as a new package first.
                    let serial = store.next_serial(&study, kind).await?;
                    let package = InputDataPackage {
                        study_id: study.clone(),
                        pipeline: kind,
                        serial_number: serial,
                        filepath: dir,
                        description: description.clone(),
                        upload_time: Utc::now(),
                        owner_user_id: owner.clone(),
                        samples_annot_file,
                        ctrl_file,
                        interval_file,
                        gtf_file,
                    };
                    store.insert_package(&package).await?;
                    info!(study = %study, serial, "Registered uploaded package");
                    Some(RawDataSelection::FreshUpload { package })
                }
                (None, Some(serial)) => {
                    let package = store
                        .find_package(&study, kind, serial)
                        .await?
                        .with_context(|| {
                            format!("no package with serial {serial} for study {study}")
                        })?;
                    Some(RawDataSelection::Reuse { package, excluded })
                }
                (None, None) => None,
                (Some(_), Some(_)) => unreachable!("clap rejects this combination"),
            };

            let notifier = Notifier::new(
                Arc::new(LogMailer),
                Arc::new(StaticDirectory::new().with_user(&owner, &owner_email)),
                config.mail_sender.clone(),
                config.support_recipients.clone(),
            )?;

            let engine = Arc::new(Engine::new(config, store, notifier));
            let request = SubmitRequest {
                study_id: study,
                owner_user_id: owner,
                kind,
                annotation,
                selection,
                processing: ProcessingParams {
                    normalization,
                    summarization,
                    read_depth,
                    variant_depth,
                    exclude_db,
                },
            };

            let outcome = engine.submit(request).await?;
            println!("Submitted job {}", outcome.job_id);
            for name in &outcome.missing_files {
                println!("Warning: annotated file not received: {name}");
            }

            if wait {
                match outcome.detector {
                    Some(handle) => handle.await?,
                    None => bail!("completion detector did not attach; job will not resolve"),
                }
                let job = engine.store().get_job(outcome.job_id).await?;
                println!("Job {} finished with status {}", job.id, job.status);
            } else if outcome.detector.is_some() {
                // Detached submission still needs this process alive to
                // observe completion; detach is for embedding callers.
                println!("Job running; completion requires the engine process to stay up");
            }
        }

        Commands::Status { job_id } => {
            let job = store.get_job(job_id).await?;
            println!(
                "{}\t{}\t{}\t{}\tsubmitted {}\tcompleted {}",
                job.id,
                job.study_id,
                job.pipeline.display_name(),
                job.status,
                job.submit_time.to_rfc3339(),
                job.complete_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
            );
        }

        Commands::List { study } => {
            for job in store.list_jobs_for_study(&study).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    job.id,
                    job.pipeline.display_name(),
                    job.status,
                    job.submit_time.to_rfc3339(),
                );
            }
        }
    }

    Ok(())
}
