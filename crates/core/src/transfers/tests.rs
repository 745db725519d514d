use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::events::DomainEvent;
use crate::jobs::{JobConcurrency, JobHandler, JobInput, JobOutput, UNREACHABLE_RETRY_DELAY};
use crate::nodes::{Node, NodeType};
use crate::test_support::{
    account, job, recording_bus, write_file, FakeRemote, MemoryAccounts, MemoryNodes,
    MemoryTransfers,
};
use crate::utils::time::now_db_timestamp;

const FILE_ID: &str = "file-1";

struct Fixture {
    dir: TempDir,
    nodes: Arc<MemoryNodes>,
    transfers: Arc<MemoryTransfers>,
    remote: Arc<FakeRemote>,
    events: Arc<Mutex<Vec<DomainEvent>>>,
    upload: FileUploadJobHandler,
    download: FileDownloadJobHandler,
}

impl Fixture {
    fn new(server_revision: i64) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let accounts = Arc::new(MemoryAccounts::default());
        accounts
            .accounts
            .lock()
            .unwrap()
            .insert("a1".to_string(), account("a1", "tandem.test"));

        let nodes = Arc::new(MemoryNodes::default());
        let attributes = json!({
            "type": "file",
            "name": "notes.txt",
            "mimeType": "text/plain",
            "extension": ".txt",
            "size": 11
        });
        nodes.nodes.lock().unwrap().insert(
            FILE_ID.to_string(),
            Node {
                id: FILE_ID.to_string(),
                node_type: NodeType::File,
                parent_id: Some("page-1".to_string()),
                root_id: "space-1".to_string(),
                workspace_id: "w1".to_string(),
                attributes: attributes.as_object().cloned().expect("object"),
                state: Vec::new(),
                local_revision: 1,
                server_revision,
                created_at: now_db_timestamp(),
                created_by: "alice".to_string(),
                updated_at: None,
                updated_by: None,
            },
        );

        let transfers = Arc::new(MemoryTransfers::default());
        let remote = Arc::new(FakeRemote::default());
        let (bus, events) = recording_bus();

        let upload = FileUploadJobHandler::new(
            accounts.clone(),
            nodes.clone(),
            transfers.clone(),
            remote.clone(),
            bus.clone(),
            dir.path().join("files"),
        );
        let download = FileDownloadJobHandler::new(
            accounts,
            nodes.clone(),
            transfers.clone(),
            remote.clone(),
            bus,
            dir.path().join("temp"),
        );

        Self {
            dir,
            nodes,
            transfers,
            remote,
            events,
            upload,
            download,
        }
    }

    fn local_file(&self) -> PathBuf {
        local_file_path(&self.dir.path().join("files"), "w1", FILE_ID, ".txt")
    }

    fn add_upload(&self) {
        self.transfers.uploads.lock().unwrap().insert(
            FILE_ID.to_string(),
            Upload::new(FILE_ID, "w1", now_db_timestamp()),
        );
    }

    fn add_download(&self) -> PathBuf {
        let destination = self.dir.path().join("exports").join("notes.txt");
        self.transfers.downloads.lock().unwrap().insert(
            FILE_ID.to_string(),
            Download::new(
                FILE_ID,
                "w1",
                destination.to_string_lossy(),
                DownloadType::Manual,
                now_db_timestamp(),
            ),
        );
        destination
    }

    fn upload_job(&self) -> crate::jobs::Job {
        job(JobInput::FileUpload {
            account_id: "a1".to_string(),
            workspace_id: "w1".to_string(),
            file_id: FILE_ID.to_string(),
        })
    }

    fn download_job(&self) -> crate::jobs::Job {
        job(JobInput::FileDownload {
            account_id: "a1".to_string(),
            workspace_id: "w1".to_string(),
            file_id: FILE_ID.to_string(),
        })
    }
}

#[tokio::test]
async fn upload_completes_and_drops_the_record() {
    let fixture = Fixture::new(3);
    fixture.add_upload();
    write_file(&fixture.local_file(), b"hello world").await;
    fixture.remote.upload_offset.store(4, Ordering::SeqCst);

    let output = fixture.upload.handle(&fixture.upload_job()).await.expect("handle");

    assert_eq!(output, JobOutput::Success);
    assert!(fixture.transfers.get_upload(FILE_ID).expect("read").is_none());
    assert_eq!(
        *fixture.remote.uploads.lock().unwrap(),
        vec![(FILE_ID.to_string(), 4)]
    );
    assert!(fixture.events.lock().unwrap().contains(&DomainEvent::UploadUpdated {
        workspace_id: "w1".to_string(),
        file_id: FILE_ID.to_string(),
        status: UploadStatus::Completed,
        progress: 100,
    }));
}

#[tokio::test]
async fn upload_waits_until_the_node_reached_the_server() {
    let fixture = Fixture::new(0);
    fixture.add_upload();
    write_file(&fixture.local_file(), b"hello world").await;

    let output = fixture.upload.handle(&fixture.upload_job()).await.expect("handle");

    assert!(matches!(output, JobOutput::Retry { .. }));
    assert_eq!(fixture.remote.transfer_calls.load(Ordering::SeqCst), 0);
    let upload = fixture.transfers.get_upload(FILE_ID).expect("read").expect("upload");
    assert_eq!(upload.retries, 0);
}

#[tokio::test]
async fn unreachable_server_retries_without_counting_a_failure() {
    let fixture = Fixture::new(3);
    fixture.add_upload();
    fixture.remote.set_reachable(false);

    let output = fixture.upload.handle(&fixture.upload_job()).await.expect("handle");

    assert_eq!(
        output,
        JobOutput::Retry {
            delay: UNREACHABLE_RETRY_DELAY
        }
    );
    let upload = fixture.transfers.get_upload(FILE_ID).expect("read").expect("upload");
    assert_eq!(upload.retries, 0);
    assert_eq!(upload.status, UploadStatus::Pending);
}

#[tokio::test]
async fn missing_record_means_nothing_to_do() {
    let fixture = Fixture::new(3);

    let output = fixture.upload.handle(&fixture.upload_job()).await.expect("handle");

    assert_eq!(output, JobOutput::Success);
    assert_eq!(fixture.remote.transfer_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn upload_fails_for_good_after_ten_attempts() {
    let fixture = Fixture::new(3);
    fixture.add_upload();
    write_file(&fixture.local_file(), b"hello world").await;
    fixture.remote.fail_transfers.store(true, Ordering::SeqCst);

    for attempt in 1..TRANSFER_MAX_RETRIES {
        let output = fixture.upload.handle(&fixture.upload_job()).await.expect("handle");
        assert!(matches!(output, JobOutput::Retry { .. }), "attempt {}", attempt);
        let upload = fixture.transfers.get_upload(FILE_ID).expect("read").expect("upload");
        assert_eq!(upload.retries, attempt);
        assert_eq!(upload.status, UploadStatus::Pending);
    }

    let output = fixture.upload.handle(&fixture.upload_job()).await.expect("handle");
    assert_eq!(output, JobOutput::Success);
    let upload = fixture.transfers.get_upload(FILE_ID).expect("read").expect("upload");
    assert_eq!(upload.status, UploadStatus::Failed);
    assert_eq!(upload.progress, 0);
    assert_eq!(upload.retries, TRANSFER_MAX_RETRIES);
    assert_eq!(upload.error_code.as_deref(), Some(ERROR_UPLOAD_FAILED));

    // A failed record is left alone by later runs.
    let output = fixture.upload.handle(&fixture.upload_job()).await.expect("handle");
    assert_eq!(output, JobOutput::Success);
    assert_eq!(
        fixture.remote.transfer_calls.load(Ordering::SeqCst),
        TRANSFER_MAX_RETRIES as usize
    );
}

#[tokio::test]
async fn missing_local_file_fails_immediately() {
    let fixture = Fixture::new(3);
    fixture.add_upload();

    let output = fixture.upload.handle(&fixture.upload_job()).await.expect("handle");

    assert_eq!(output, JobOutput::Success);
    let upload = fixture.transfers.get_upload(FILE_ID).expect("read").expect("upload");
    assert_eq!(upload.status, UploadStatus::Failed);
    assert_eq!(upload.error_code.as_deref(), Some(ERROR_FILE_NOT_FOUND));
}

#[tokio::test]
async fn upload_of_a_deleted_file_is_dropped() {
    let fixture = Fixture::new(3);
    fixture.add_upload();
    fixture.nodes.nodes.lock().unwrap().clear();

    let output = fixture.upload.handle(&fixture.upload_job()).await.expect("handle");

    assert_eq!(output, JobOutput::Success);
    assert!(fixture.transfers.get_upload(FILE_ID).expect("read").is_none());
}

#[tokio::test]
async fn download_resumes_from_the_partial_file() {
    let fixture = Fixture::new(3);
    let destination = fixture.add_download();
    *fixture.remote.remote_bytes.lock().unwrap() = b"hello world".to_vec();
    let partial = fixture.download.partial_path(FILE_ID);
    write_file(&partial, b"hello").await;

    let output = fixture.download.handle(&fixture.download_job()).await.expect("handle");

    assert_eq!(output, JobOutput::Success);
    let contents = tokio::fs::read(&destination).await.expect("read");
    assert_eq!(contents, b"hello world");
    assert!(!partial.exists());
    assert!(fixture.transfers.get_download(FILE_ID).expect("read").is_none());
    assert!(fixture.events.lock().unwrap().contains(&DomainEvent::DownloadUpdated {
        workspace_id: "w1".to_string(),
        file_id: FILE_ID.to_string(),
        status: DownloadStatus::Completed,
        progress: 100,
    }));
}

#[tokio::test]
async fn download_failure_is_counted_on_the_record() {
    let fixture = Fixture::new(3);
    fixture.add_download();
    fixture.remote.fail_transfers.store(true, Ordering::SeqCst);

    let output = fixture.download.handle(&fixture.download_job()).await.expect("handle");

    assert!(matches!(output, JobOutput::Retry { .. }));
    let download = fixture.transfers.get_download(FILE_ID).expect("read").expect("download");
    assert_eq!(download.retries, 1);
    assert_eq!(download.error_code.as_deref(), Some(ERROR_DOWNLOAD_FAILED));
}

#[test]
fn transfers_of_one_file_share_a_concurrency_key() {
    let fixture = Fixture::new(3);
    let expected = Some(JobConcurrency {
        key: format!("transfer.{}", FILE_ID),
        limit: 1,
    });
    assert_eq!(fixture.upload.concurrency(&fixture.upload_job().input), expected);
    assert_eq!(fixture.download.concurrency(&fixture.download_job().input), expected);
}
