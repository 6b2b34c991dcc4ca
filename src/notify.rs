//! Outcome notifications.
//!
//! Composes templated email for a finished job and hands it to the mail
//! transport. Success mail goes to the job owner; failure mail adds the
//! support distribution list. By the time a notification is attempted the
//! job outcome is already durably recorded, so delivery errors are logged
//! and swallowed, never propagated back into job state.

use std::sync::Arc;

use async_trait::async_trait;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{info, warn};

use crate::job::Job;

/// Errors that can occur while composing or delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Template rendering failed: {0}")]
    Template(#[from] tera::Error),

    #[error("Mail delivery failed: {0}")]
    Delivery(String),

    #[error("No email address known for user '{0}'")]
    UnknownUser(String),
}

/// One outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Mail transport seam. Deployments wire in their own delivery mechanism.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError>;
}

/// Resolves a portal user id to an email address.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn email_for(&self, user_id: &str) -> Result<String, NotifyError>;
}

/// Outcome of a finished job, as seen by the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed { exit_code: i32 },
}

const SUCCESS_SUBJECT: &str = "[{{ study_id }}] {{ pipeline }} job {{ job_id }} completed";
const SUCCESS_BODY: &str = "\
Your {{ pipeline }} job {{ job_id }} for study {{ study_id }} finished successfully.

Results: {{ output }}
Report: {{ report }}
";

const FAILURE_SUBJECT: &str = "[{{ study_id }}] {{ pipeline }} job {{ job_id }} failed";
const FAILURE_BODY: &str = "\
Your {{ pipeline }} job {{ job_id }} for study {{ study_id }} failed with exit code {{ exit_code }}.

The pipeline support team has been notified and will follow up. The process
log for this job has been retained for diagnosis.
";

/// Composes and dispatches outcome mail for finished jobs.
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    directory: Arc<dyn UserDirectory>,
    templates: Tera,
    sender: String,
    support_recipients: Vec<String>,
}

impl Notifier {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        directory: Arc<dyn UserDirectory>,
        sender: impl Into<String>,
        support_recipients: Vec<String>,
    ) -> Result<Self, NotifyError> {
        let mut templates = Tera::default();
        templates.add_raw_templates([
            ("success_subject", SUCCESS_SUBJECT),
            ("success_body", SUCCESS_BODY),
            ("failure_subject", FAILURE_SUBJECT),
            ("failure_body", FAILURE_BODY),
        ])?;

        Ok(Self {
            mailer,
            directory,
            templates,
            sender: sender.into(),
            support_recipients,
        })
    }

    /// Sends the outcome notification for `job`.
    ///
    /// Never fails: any composition or delivery error is logged here and
    /// dropped, since the job's terminal status is already recorded.
    pub async fn notify(&self, job: &Job, outcome: JobOutcome) {
        match self.try_notify(job, outcome).await {
            Ok(()) => info!(job_id = job.id, ?outcome, "Outcome notification sent"),
            Err(e) => warn!(
                job_id = job.id,
                ?outcome,
                error = %e,
                "Failed to send outcome notification"
            ),
        }
    }

    async fn try_notify(&self, job: &Job, outcome: JobOutcome) -> Result<(), NotifyError> {
        let mail = self.compose(job, outcome).await?;
        self.mailer.send(&mail).await
    }

    /// Builds the message without sending it.
    pub async fn compose(&self, job: &Job, outcome: JobOutcome) -> Result<OutgoingMail, NotifyError> {
        let owner = self.directory.email_for(&job.owner_user_id).await?;

        let mut ctx = Context::new();
        ctx.insert("job_id", &job.id);
        ctx.insert("study_id", &job.study_id);
        ctx.insert("pipeline", job.pipeline.display_name());
        ctx.insert("output", &job.output_file_path);
        ctx.insert("report", &job.report_path);

        let (subject, body, to) = match outcome {
            JobOutcome::Succeeded => (
                self.templates.render("success_subject", &ctx)?,
                self.templates.render("success_body", &ctx)?,
                vec![owner],
            ),
            JobOutcome::Failed { exit_code } => {
                ctx.insert("exit_code", &exit_code);
                let mut to = vec![owner];
                to.extend(self.support_recipients.iter().cloned());
                (
                    self.templates.render("failure_subject", &ctx)?,
                    self.templates.render("failure_body", &ctx)?,
                    to,
                )
            }
        };

        Ok(OutgoingMail {
            from: self.sender.clone(),
            to,
            subject,
            body,
        })
    }
}

/// A mailer that only logs; the default when no transport is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        info!(
            to = ?mail.to,
            subject = %mail.subject,
            "Mail transport not configured; logging message instead"
        );
        Ok(())
    }
}

/// A mailer that records messages instead of delivering them. Used by
/// tests and dry runs.
#[derive(Default)]
pub struct RecordingMailer {
    sent: std::sync::Mutex<Vec<OutgoingMail>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recording mailer whose every send fails.
    pub fn failing() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Snapshot of everything sent so far.
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Delivery("transport unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// A fixed user-id to address mapping.
#[derive(Default)]
pub struct StaticDirectory {
    entries: std::collections::HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>, email: impl Into<String>) -> Self {
        self.entries.insert(user_id.into(), email.into());
        self
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn email_for(&self, user_id: &str) -> Result<String, NotifyError> {
        self.entries
            .get(user_id)
            .cloned()
            .ok_or_else(|| NotifyError::UnknownUser(user_id.to_string()))
    }
}
