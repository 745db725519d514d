//! Upload and download records.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Transfers failing this many times end in the `failed` state.
pub const TRANSFER_MAX_RETRIES: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadType {
    Auto,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub file_id: String,
    pub workspace_id: String,
    pub upload_id: String,
    pub status: UploadStatus,
    pub progress: i32,
    pub retries: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub completed_at: Option<String>,
}

impl Upload {
    pub fn new(file_id: impl Into<String>, workspace_id: impl Into<String>, created_at: String) -> Self {
        Self {
            file_id: file_id.into(),
            workspace_id: workspace_id.into(),
            upload_id: uuid::Uuid::now_v7().to_string(),
            status: UploadStatus::Pending,
            progress: 0,
            retries: 0,
            error_code: None,
            error_message: None,
            created_at,
            updated_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    pub file_id: String,
    pub workspace_id: String,
    pub download_id: String,
    pub path: String,
    pub download_type: DownloadType,
    pub status: DownloadStatus,
    pub progress: i32,
    pub retries: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub completed_at: Option<String>,
}

impl Download {
    pub fn new(
        file_id: impl Into<String>,
        workspace_id: impl Into<String>,
        path: impl Into<String>,
        download_type: DownloadType,
        created_at: String,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            workspace_id: workspace_id.into(),
            download_id: uuid::Uuid::now_v7().to_string(),
            path: path.into(),
            download_type,
            status: DownloadStatus::Pending,
            progress: 0,
            retries: 0,
            error_code: None,
            error_message: None,
            created_at,
            updated_at: None,
            completed_at: None,
        }
    }
}

/// Persisted after a failed transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    pub file_id: String,
    pub retries: i32,
    pub error_code: String,
    pub error_message: String,
    /// Final attempt: the record becomes `failed` with progress reset.
    pub terminal: bool,
}

/// Where a file's bytes live locally: `<files_dir>/<workspace>/<file_id><extension>`.
pub fn local_file_path(files_dir: &Path, workspace_id: &str, file_id: &str, extension: &str) -> PathBuf {
    files_dir
        .join(workspace_id)
        .join(format!("{}{}", file_id, extension))
}

/// Whole-percent progress, clamped to 0..=100.
pub fn progress_percent(transferred: u64, total: u64) -> i32 {
    if total == 0 {
        return 100;
    }
    ((transferred.min(total) * 100) / total) as i32
}
