use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde_json::{json, Map, Value};

use super::{local_file_path, Download, DownloadType, TransferRepositoryTrait, Upload};
use crate::errors::{Error, Result, ValidationError};
use crate::events::{DomainEvent, EventBus};
use crate::jobs::{JobInput, JobOptions, JobService};
use crate::nodes::{CreateNodeInput, InitialTransfer, Node, NodeService, NodeType};

/// Local entry point for file nodes: imports bytes and queues transfers.
pub struct FileService {
    nodes: Arc<NodeService>,
    transfers: Arc<dyn TransferRepositoryTrait>,
    jobs: Arc<JobService>,
    event_bus: Arc<dyn EventBus>,
    files_dir: PathBuf,
}

impl FileService {
    pub fn new(
        nodes: Arc<NodeService>,
        transfers: Arc<dyn TransferRepositoryTrait>,
        jobs: Arc<JobService>,
        event_bus: Arc<dyn EventBus>,
        files_dir: PathBuf,
    ) -> Self {
        Self {
            nodes,
            transfers,
            jobs,
            event_bus,
            files_dir,
        }
    }

    /// Copies `source` into the workspace's file store, creates the file node
    /// with a pending upload and queues the upload job.
    pub async fn create_file(&self, parent_id: &str, source: &Path) -> Result<Node> {
        let metadata = tokio::fs::metadata(source).await?;
        if !metadata.is_file() {
            return Err(ValidationError::InvalidInput(format!(
                "{} is not a file",
                source.display()
            ))
            .into());
        }
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ValidationError::InvalidInput("file name is not valid UTF-8".to_string()))?
            .to_string();
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();

        let context = self.nodes.context().clone();
        let file_id = uuid::Uuid::now_v7().to_string();
        let destination = local_file_path(&self.files_dir, &context.workspace_id, &file_id, &extension);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &destination).await?;

        let mut attributes = Map::new();
        attributes.insert("type".to_string(), json!(NodeType::File.as_str()));
        attributes.insert("name".to_string(), Value::String(name));
        attributes.insert("mimeType".to_string(), json!(mime_type_for(&extension)));
        attributes.insert("extension".to_string(), Value::String(extension));
        attributes.insert("size".to_string(), json!(metadata.len()));

        let input = CreateNodeInput::new(Some(parent_id.to_string()), attributes)
            .with_id(&file_id)
            .with_transfer(InitialTransfer::Upload);
        let node = match self.nodes.create_node(input).await {
            Ok(node) => node,
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_file(&destination).await {
                    warn!(
                        "[Transfers] Could not remove {} after failed create: {}",
                        destination.display(),
                        cleanup
                    );
                }
                return Err(err);
            }
        };

        self.jobs
            .add_job(
                JobInput::FileUpload {
                    account_id: context.account_id,
                    workspace_id: context.workspace_id,
                    file_id: file_id.clone(),
                },
                JobOptions::deduplicate(format!("file.upload.{}", file_id), false),
            )
            .await?;
        info!("[Transfers] Queued upload of {}", file_id);
        Ok(node)
    }

    /// Records a download of `file_id` into `path` (the file store when
    /// `None`) and queues the job. An existing request is reused.
    pub async fn request_download(&self, file_id: &str, path: Option<PathBuf>) -> Result<Download> {
        let node = self
            .nodes
            .get_node(file_id)?
            .ok_or_else(|| Error::not_found(format!("File {}", file_id)))?;
        if node.node_type != NodeType::File {
            return Err(ValidationError::InvalidInput(format!(
                "{} is a {}, not a file",
                file_id, node.node_type
            ))
            .into());
        }

        let context = self.nodes.context().clone();
        let (path, download_type) = match path {
            Some(path) => (path, DownloadType::Manual),
            None => (
                local_file_path(
                    &self.files_dir,
                    &context.workspace_id,
                    file_id,
                    node.attribute_str("extension").unwrap_or_default(),
                ),
                DownloadType::Auto,
            ),
        };
        let download = self
            .transfers
            .create_download(Download::new(
                file_id,
                &context.workspace_id,
                path.to_string_lossy(),
                download_type,
                crate::utils::time::now_db_timestamp(),
            ))
            .await?;
        self.event_bus.publish(DomainEvent::DownloadUpdated {
            workspace_id: download.workspace_id.clone(),
            file_id: download.file_id.clone(),
            status: download.status,
            progress: download.progress,
        });

        self.jobs
            .add_job(
                JobInput::FileDownload {
                    account_id: context.account_id,
                    workspace_id: context.workspace_id,
                    file_id: file_id.to_string(),
                },
                JobOptions::deduplicate(format!("file.download.{}", file_id), false),
            )
            .await?;
        Ok(download)
    }

    pub fn failed_uploads(&self) -> Result<Vec<Upload>> {
        self.transfers
            .list_failed_uploads(&self.nodes.context().workspace_id)
    }
}

fn mime_type_for(extension: &str) -> &'static str {
    match extension.trim_start_matches('.') {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "zip" => "application/zip",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
