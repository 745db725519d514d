//! Job domain models.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_QUEUE: &str = "main";
pub const DEFAULT_JOB_RETRIES: u32 = 5;
/// Delay handlers use when the server cannot be reached.
pub const UNREACHABLE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Typed unit of work. The `type` tag selects the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobInput {
    #[serde(rename = "file.upload", rename_all = "camelCase")]
    FileUpload {
        account_id: String,
        workspace_id: String,
        file_id: String,
    },
    #[serde(rename = "file.download", rename_all = "camelCase")]
    FileDownload {
        account_id: String,
        workspace_id: String,
        file_id: String,
    },
    #[serde(rename = "account.sync", rename_all = "camelCase")]
    AccountSync { account_id: String },
    #[serde(rename = "server.sync")]
    ServerSync { server: String },
    #[serde(rename = "mutations.sync", rename_all = "camelCase")]
    MutationsSync {
        account_id: String,
        workspace_id: String,
    },
    #[serde(rename = "token.delete")]
    TokenDelete { token: String, server: String },
    #[serde(rename = "files.clean.temp")]
    FilesCleanTemp {},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "file.upload")]
    FileUpload,
    #[serde(rename = "file.download")]
    FileDownload,
    #[serde(rename = "account.sync")]
    AccountSync,
    #[serde(rename = "server.sync")]
    ServerSync,
    #[serde(rename = "mutations.sync")]
    MutationsSync,
    #[serde(rename = "token.delete")]
    TokenDelete,
    #[serde(rename = "files.clean.temp")]
    FilesCleanTemp,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileUpload => "file.upload",
            Self::FileDownload => "file.download",
            Self::AccountSync => "account.sync",
            Self::ServerSync => "server.sync",
            Self::MutationsSync => "mutations.sync",
            Self::TokenDelete => "token.delete",
            Self::FilesCleanTemp => "files.clean.temp",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JobInput {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::FileUpload { .. } => JobType::FileUpload,
            Self::FileDownload { .. } => JobType::FileDownload,
            Self::AccountSync { .. } => JobType::AccountSync,
            Self::ServerSync { .. } => JobType::ServerSync,
            Self::MutationsSync { .. } => JobType::MutationsSync,
            Self::TokenDelete { .. } => JobType::TokenDelete,
            Self::FilesCleanTemp {} => JobType::FilesCleanTemp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobScheduleStatus {
    Active,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub input: JobInput,
    pub status: JobStatus,
    pub retries: u32,
    /// Retry ceiling for handler errors.
    pub max_retries: u32,
    pub scheduled_at: DateTime<Utc>,
    pub deduplication_key: Option<String>,
    pub concurrency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub id: String,
    pub queue: String,
    pub input: JobInput,
    pub max_retries: u32,
    pub scheduled_at: DateTime<Utc>,
    pub deduplication_key: Option<String>,
    pub concurrency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDeduplication {
    pub key: String,
    /// Overwrite the waiting job's payload and schedule instead of keeping it.
    pub replace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    pub queue: String,
    pub max_retries: u32,
    pub delay: Option<Duration>,
    pub deduplication: Option<JobDeduplication>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            max_retries: DEFAULT_JOB_RETRIES,
            delay: None,
            deduplication: None,
        }
    }
}

impl JobOptions {
    pub fn deduplicate(key: impl Into<String>, replace: bool) -> Self {
        Self {
            deduplication: Some(JobDeduplication {
                key: key.into(),
                replace,
            }),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// What a handler asks the scheduler to do with its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    Success,
    /// Run again after `delay` without consuming a retry.
    Retry { delay: Duration },
}

/// At most `limit` jobs sharing `key` run at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConcurrency {
    pub key: String,
    pub limit: usize,
}

/// Recurring job definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSchedule {
    pub id: String,
    pub queue: String,
    pub input: JobInput,
    pub max_retries: u32,
    pub interval: Duration,
    pub next_run_at: DateTime<Utc>,
    pub status: JobScheduleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
