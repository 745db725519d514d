//! `file.upload` and `file.download` handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{
    local_file_path, progress_percent, DownloadStatus, TransferFailure, TransferRepositoryTrait,
    UploadStatus, TRANSFER_MAX_RETRIES,
};
use crate::accounts::AccountRepositoryTrait;
use crate::errors::{Error, Result};
use crate::events::{DomainEvent, EventBus};
use crate::jobs::{
    unexpected_input, Job, JobConcurrency, JobHandler, JobInput, JobOutput, UNREACHABLE_RETRY_DELAY,
};
use crate::nodes::NodeRepositoryTrait;
use crate::remote::{FileTransfer, ProgressCallback, RemoteApi};
use crate::sync::backoff_delay;

const TRANSFER_BACKOFF_BASE: Duration = Duration::from_secs(2);
const TRANSFER_BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);

pub const ERROR_FILE_NOT_FOUND: &str = "file_not_found";
pub const ERROR_UPLOAD_FAILED: &str = "upload_failed";
pub const ERROR_DOWNLOAD_FAILED: &str = "download_failed";

/// One transfer per file at a time.
fn transfer_concurrency(input: &JobInput) -> Option<JobConcurrency> {
    match input {
        JobInput::FileUpload { file_id, .. } | JobInput::FileDownload { file_id, .. } => {
            Some(JobConcurrency {
                key: format!("transfer.{}", file_id),
                limit: 1,
            })
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferKind {
    Upload,
    Download,
}

/// Persists an in-flight progress value and publishes it.
async fn persist_progress(
    kind: TransferKind,
    transfers: &dyn TransferRepositoryTrait,
    event_bus: &dyn EventBus,
    file_id: &str,
    progress: i32,
) -> Result<()> {
    match kind {
        TransferKind::Upload => {
            if let Some(upload) = transfers
                .update_upload_progress(file_id, UploadStatus::Uploading, progress)
                .await?
            {
                event_bus.publish(DomainEvent::UploadUpdated {
                    workspace_id: upload.workspace_id,
                    file_id: upload.file_id,
                    status: upload.status,
                    progress: upload.progress,
                });
            }
        }
        TransferKind::Download => {
            if let Some(download) = transfers
                .update_download_progress(file_id, DownloadStatus::Downloading, progress)
                .await?
            {
                event_bus.publish(DomainEvent::DownloadUpdated {
                    workspace_id: download.workspace_id,
                    file_id: download.file_id,
                    status: download.status,
                    progress: download.progress,
                });
            }
        }
    }
    Ok(())
}

/// Returns a callback for the remote client and the task that drains it.
/// Only the latest value is kept, so a slow database never stalls the transfer.
fn spawn_progress_reporter(
    kind: TransferKind,
    transfers: Arc<dyn TransferRepositoryTrait>,
    event_bus: Arc<dyn EventBus>,
    file_id: String,
    initial: i32,
) -> (ProgressCallback, JoinHandle<()>) {
    let (sender, mut receiver) = watch::channel(initial);
    let reporter = tokio::spawn(async move {
        while receiver.changed().await.is_ok() {
            let progress = *receiver.borrow_and_update();
            if let Err(err) =
                persist_progress(kind, transfers.as_ref(), event_bus.as_ref(), &file_id, progress)
                    .await
            {
                warn!("[Transfers] Failed to persist progress of {}: {}", file_id, err);
            }
        }
    });
    let callback: ProgressCallback = Arc::new(move |transferred, total| {
        let next = progress_percent(transferred, total);
        sender.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    });
    (callback, reporter)
}

/// Counts one failed attempt. The last allowed failure marks the record
/// `failed` and completes the job; earlier ones reschedule it.
async fn record_failure(
    kind: TransferKind,
    transfers: &dyn TransferRepositoryTrait,
    event_bus: &dyn EventBus,
    file_id: &str,
    previous_retries: i32,
    error_code: &str,
    error: &Error,
) -> Result<JobOutput> {
    let retries = previous_retries + 1;
    let terminal = error_code == ERROR_FILE_NOT_FOUND || retries >= TRANSFER_MAX_RETRIES;
    let failure = TransferFailure {
        file_id: file_id.to_string(),
        retries,
        error_code: error_code.to_string(),
        error_message: error.to_string(),
        terminal,
    };

    match kind {
        TransferKind::Upload => {
            if let Some(upload) = transfers.record_upload_failure(failure).await? {
                event_bus.publish(DomainEvent::UploadUpdated {
                    workspace_id: upload.workspace_id,
                    file_id: upload.file_id,
                    status: upload.status,
                    progress: upload.progress,
                });
            }
        }
        TransferKind::Download => {
            if let Some(download) = transfers.record_download_failure(failure).await? {
                event_bus.publish(DomainEvent::DownloadUpdated {
                    workspace_id: download.workspace_id,
                    file_id: download.file_id,
                    status: download.status,
                    progress: download.progress,
                });
            }
        }
    }

    if terminal {
        warn!(
            "[Transfers] {:?} of {} failed for good after {} attempts: {}",
            kind, file_id, retries, error
        );
        return Ok(JobOutput::Success);
    }
    debug!(
        "[Transfers] {:?} of {} failed (attempt {}/{}): {}",
        kind, file_id, retries, TRANSFER_MAX_RETRIES, error
    );
    Ok(JobOutput::Retry {
        delay: backoff_delay(retries as u32, TRANSFER_BACKOFF_BASE, TRANSFER_BACKOFF_MAX),
    })
}

pub struct FileUploadJobHandler {
    accounts: Arc<dyn AccountRepositoryTrait>,
    nodes: Arc<dyn NodeRepositoryTrait>,
    transfers: Arc<dyn TransferRepositoryTrait>,
    remote: Arc<dyn RemoteApi>,
    event_bus: Arc<dyn EventBus>,
    files_dir: PathBuf,
}

impl FileUploadJobHandler {
    pub fn new(
        accounts: Arc<dyn AccountRepositoryTrait>,
        nodes: Arc<dyn NodeRepositoryTrait>,
        transfers: Arc<dyn TransferRepositoryTrait>,
        remote: Arc<dyn RemoteApi>,
        event_bus: Arc<dyn EventBus>,
        files_dir: PathBuf,
    ) -> Self {
        Self {
            accounts,
            nodes,
            transfers,
            remote,
            event_bus,
            files_dir,
        }
    }
}

#[async_trait]
impl JobHandler for FileUploadJobHandler {
    fn concurrency(&self, input: &JobInput) -> Option<JobConcurrency> {
        transfer_concurrency(input)
    }

    async fn handle(&self, job: &Job) -> Result<JobOutput> {
        let JobInput::FileUpload {
            account_id,
            workspace_id,
            file_id,
        } = &job.input
        else {
            return Err(unexpected_input("file.upload", job));
        };

        let Some(upload) = self.transfers.get_upload(file_id)? else {
            debug!("[Transfers] No upload record for {}", file_id);
            return Ok(JobOutput::Success);
        };
        if matches!(upload.status, UploadStatus::Completed | UploadStatus::Failed) {
            return Ok(JobOutput::Success);
        }
        let Some(account) = self.accounts.get_account(account_id)? else {
            return Ok(JobOutput::Success);
        };
        if !self.remote.is_reachable(&account.server).await {
            return Ok(JobOutput::Retry {
                delay: UNREACHABLE_RETRY_DELAY,
            });
        }

        let Some(node) = self.nodes.get_node(file_id)? else {
            debug!("[Transfers] File {} was deleted, dropping its upload", file_id);
            self.transfers.delete_upload(file_id).await?;
            return Ok(JobOutput::Success);
        };
        if node.server_revision == 0 {
            // The server has not seen the node yet.
            return Ok(JobOutput::Retry {
                delay: UNREACHABLE_RETRY_DELAY,
            });
        }

        let extension = node.attribute_str("extension").unwrap_or_default();
        let path = local_file_path(&self.files_dir, workspace_id, file_id, extension);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let error = Error::not_found(format!("Local file {}", path.display()));
            return record_failure(
                TransferKind::Upload,
                self.transfers.as_ref(),
                self.event_bus.as_ref(),
                file_id,
                upload.retries,
                ERROR_FILE_NOT_FOUND,
                &error,
            )
            .await;
        }

        let outcome = async {
            let offset = self
                .remote
                .upload_offset(&account, workspace_id, file_id)
                .await?;
            persist_progress(
                TransferKind::Upload,
                self.transfers.as_ref(),
                self.event_bus.as_ref(),
                file_id,
                upload.progress,
            )
            .await?;

            let (progress, reporter) = spawn_progress_reporter(
                TransferKind::Upload,
                Arc::clone(&self.transfers),
                Arc::clone(&self.event_bus),
                file_id.clone(),
                upload.progress,
            );
            let result = self
                .remote
                .upload_file(FileTransfer {
                    account: &account,
                    workspace_id,
                    file_id,
                    path: &path,
                    offset,
                    progress,
                })
                .await;
            reporter.abort();
            result
        }
        .await;

        match outcome {
            Ok(()) => {
                self.transfers.delete_upload(file_id).await?;
                info!("[Transfers] Uploaded {}", file_id);
                self.event_bus.publish(DomainEvent::UploadUpdated {
                    workspace_id: workspace_id.clone(),
                    file_id: file_id.clone(),
                    status: UploadStatus::Completed,
                    progress: 100,
                });
                Ok(JobOutput::Success)
            }
            Err(err) => {
                record_failure(
                    TransferKind::Upload,
                    self.transfers.as_ref(),
                    self.event_bus.as_ref(),
                    file_id,
                    upload.retries,
                    ERROR_UPLOAD_FAILED,
                    &err,
                )
                .await
            }
        }
    }
}

pub struct FileDownloadJobHandler {
    accounts: Arc<dyn AccountRepositoryTrait>,
    nodes: Arc<dyn NodeRepositoryTrait>,
    transfers: Arc<dyn TransferRepositoryTrait>,
    remote: Arc<dyn RemoteApi>,
    event_bus: Arc<dyn EventBus>,
    temp_dir: PathBuf,
}

impl FileDownloadJobHandler {
    pub fn new(
        accounts: Arc<dyn AccountRepositoryTrait>,
        nodes: Arc<dyn NodeRepositoryTrait>,
        transfers: Arc<dyn TransferRepositoryTrait>,
        remote: Arc<dyn RemoteApi>,
        event_bus: Arc<dyn EventBus>,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            accounts,
            nodes,
            transfers,
            remote,
            event_bus,
            temp_dir,
        }
    }

    /// Partial bytes accumulate here until the download completes.
    pub fn partial_path(&self, file_id: &str) -> PathBuf {
        self.temp_dir.join(format!("{}.part", file_id))
    }
}

#[async_trait]
impl JobHandler for FileDownloadJobHandler {
    fn concurrency(&self, input: &JobInput) -> Option<JobConcurrency> {
        transfer_concurrency(input)
    }

    async fn handle(&self, job: &Job) -> Result<JobOutput> {
        let JobInput::FileDownload {
            account_id,
            workspace_id,
            file_id,
        } = &job.input
        else {
            return Err(unexpected_input("file.download", job));
        };

        let Some(download) = self.transfers.get_download(file_id)? else {
            debug!("[Transfers] No download record for {}", file_id);
            return Ok(JobOutput::Success);
        };
        if matches!(
            download.status,
            DownloadStatus::Completed | DownloadStatus::Failed
        ) {
            return Ok(JobOutput::Success);
        }
        let Some(account) = self.accounts.get_account(account_id)? else {
            return Ok(JobOutput::Success);
        };
        if !self.remote.is_reachable(&account.server).await {
            return Ok(JobOutput::Retry {
                delay: UNREACHABLE_RETRY_DELAY,
            });
        }
        if self.nodes.get_node(file_id)?.is_none() {
            debug!("[Transfers] File {} was deleted, dropping its download", file_id);
            self.transfers.delete_download(file_id).await?;
            return Ok(JobOutput::Success);
        }

        let partial = self.partial_path(file_id);
        let destination = PathBuf::from(&download.path);
        let outcome = async {
            tokio::fs::create_dir_all(&self.temp_dir).await?;
            let offset = match tokio::fs::metadata(&partial).await {
                Ok(metadata) => metadata.len(),
                Err(_) => 0,
            };
            persist_progress(
                TransferKind::Download,
                self.transfers.as_ref(),
                self.event_bus.as_ref(),
                file_id,
                download.progress,
            )
            .await?;

            let (progress, reporter) = spawn_progress_reporter(
                TransferKind::Download,
                Arc::clone(&self.transfers),
                Arc::clone(&self.event_bus),
                file_id.clone(),
                download.progress,
            );
            let result = self
                .remote
                .download_file(FileTransfer {
                    account: &account,
                    workspace_id,
                    file_id,
                    path: &partial,
                    offset,
                    progress,
                })
                .await;
            reporter.abort();
            result?;
            move_file(&partial, &destination).await
        }
        .await;

        match outcome {
            Ok(()) => {
                self.transfers.delete_download(file_id).await?;
                info!("[Transfers] Downloaded {} to {}", file_id, destination.display());
                self.event_bus.publish(DomainEvent::DownloadUpdated {
                    workspace_id: workspace_id.clone(),
                    file_id: file_id.clone(),
                    status: DownloadStatus::Completed,
                    progress: 100,
                });
                Ok(JobOutput::Success)
            }
            Err(err) => {
                record_failure(
                    TransferKind::Download,
                    self.transfers.as_ref(),
                    self.event_bus.as_ref(),
                    file_id,
                    download.retries,
                    ERROR_DOWNLOAD_FAILED,
                    &err,
                )
                .await
            }
        }
    }
}

/// Rename, falling back to copy and delete across file systems.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}
