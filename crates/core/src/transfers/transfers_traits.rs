use async_trait::async_trait;

use super::{Download, DownloadStatus, TransferFailure, Upload, UploadStatus};
use crate::errors::Result;

#[async_trait]
pub trait TransferRepositoryTrait: Send + Sync {
    fn get_upload(&self, file_id: &str) -> Result<Option<Upload>>;

    fn get_download(&self, file_id: &str) -> Result<Option<Download>>;

    fn list_failed_uploads(&self, workspace_id: &str) -> Result<Vec<Upload>>;

    /// Inserts a download request. An existing row for the file is returned
    /// unchanged.
    async fn create_download(&self, download: Download) -> Result<Download>;

    async fn update_upload_progress(
        &self,
        file_id: &str,
        status: UploadStatus,
        progress: i32,
    ) -> Result<Option<Upload>>;

    async fn update_download_progress(
        &self,
        file_id: &str,
        status: DownloadStatus,
        progress: i32,
    ) -> Result<Option<Download>>;

    async fn record_upload_failure(&self, failure: TransferFailure) -> Result<Option<Upload>>;

    async fn record_download_failure(&self, failure: TransferFailure) -> Result<Option<Download>>;

    async fn delete_upload(&self, file_id: &str) -> Result<()>;

    async fn delete_download(&self, file_id: &str) -> Result<()>;
}
