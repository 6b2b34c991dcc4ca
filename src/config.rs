//! Engine configuration.
//!
//! Built once at startup (from the environment or a builder) and passed by
//! reference into each component. There is no lazily-loaded global setup
//! state; everything a component needs arrives through this struct.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::PipelineKind;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// External program invoked for a pipeline, plus its static argument.
///
/// The full invocation is `program static_arg param_file_path`.
#[derive(Debug, Clone)]
pub struct PipelineCommand {
    pub program: String,
    pub static_arg: String,
}

impl PipelineCommand {
    pub fn new(program: impl Into<String>, static_arg: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            static_arg: static_arg.into(),
        }
    }
}

/// Configuration for the job lifecycle engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding parameter files and per-job process logs.
    pub work_dir: PathBuf,
    /// PostgreSQL connection URL for the job store.
    pub database_url: String,
    /// Command used when no per-kind override is registered.
    pub default_command: PipelineCommand,
    /// Per-kind command overrides.
    pub command_overrides: HashMap<PipelineKind, PipelineCommand>,
    /// Sender address for outcome mail.
    pub mail_sender: String,
    /// Support distribution list added to failure mail.
    pub support_recipients: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./work"),
            database_url: "postgres://localhost/genoflow".to_string(),
            default_command: PipelineCommand::new("run-pipeline", "--params"),
            command_overrides: HashMap::new(),
            mail_sender: "portal@example.org".to_string(),
            support_recipients: vec!["pipeline-support@example.org".to_string()],
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: PostgreSQL connection URL (required)
    /// - `GENOFLOW_WORK_DIR`: parameter-file and log directory (default: ./work)
    /// - `GENOFLOW_PIPELINE_CMD`: default pipeline program (default: run-pipeline)
    /// - `GENOFLOW_PIPELINE_ARG`: static argument (default: --params)
    /// - `GENOFLOW_MAIL_SENDER`: sender address for outcome mail
    /// - `GENOFLOW_SUPPORT_RECIPIENTS`: comma-separated support list
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or validation
    /// fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        if let Ok(val) = std::env::var("GENOFLOW_WORK_DIR") {
            config.work_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("GENOFLOW_PIPELINE_CMD") {
            config.default_command.program = val;
        }

        if let Ok(val) = std::env::var("GENOFLOW_PIPELINE_ARG") {
            config.default_command.static_arg = val;
        }

        if let Ok(val) = std::env::var("GENOFLOW_MAIL_SENDER") {
            config.mail_sender = val;
        }

        if let Ok(val) = std::env::var("GENOFLOW_SUPPORT_RECIPIENTS") {
            config.support_recipients = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.work_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "work_dir cannot be empty".to_string(),
            ));
        }

        if self.default_command.program.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "pipeline command cannot be empty".to_string(),
            ));
        }

        if self.mail_sender.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "mail_sender cannot be empty".to_string(),
            ));
        }

        if self.support_recipients.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "support_recipients cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the command for a pipeline kind, falling back to the default.
    pub fn command_for(&self, kind: PipelineKind) -> &PipelineCommand {
        self.command_overrides
            .get(&kind)
            .unwrap_or(&self.default_command)
    }

    /// Builder method to set the work directory.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the default pipeline command.
    pub fn with_default_command(mut self, command: PipelineCommand) -> Self {
        self.default_command = command;
        self
    }

    /// Builder method to register a per-kind command override.
    pub fn with_command_override(mut self, kind: PipelineKind, command: PipelineCommand) -> Self {
        self.command_overrides.insert(kind, command);
        self
    }

    /// Builder method to set the mail sender.
    pub fn with_mail_sender(mut self, sender: impl Into<String>) -> Self {
        self.mail_sender = sender.into();
        self
    }

    /// Builder method to set the support distribution list.
    pub fn with_support_recipients(mut self, recipients: Vec<String>) -> Self {
        self.support_recipients = recipients;
        self
    }
}
