//! Device client for the Tandem server's REST API.
//!
//! One client serves every account on the device; the server to talk to is
//! derived from each account's `server` domain.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, warn};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RANGE};
use reqwest::StatusCode;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::time::sleep;

use tandem_core::accounts::{Account, AccountProfile, ServerConfig};
use tandem_core::mutations::{Mutation, MutationPushResult};
use tandem_core::remote::{FileTransfer, ProgressCallback, RemoteApi};

use crate::error::{DeviceSyncError, Result};
use crate::types::*;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const TIMEOUT_ENV: &str = "TANDEM_REQUEST_TIMEOUT_SECS";
const MAX_LOG_BODY_CHARS: usize = 512;
const DEFAULT_UPLOAD_CHUNK_BYTES: usize = 4 * 1024 * 1024;
const CHUNK_MAX_ATTEMPTS: usize = 3;
const CHUNK_BASE_BACKOFF_MS: u64 = 250;
const CHUNK_MAX_BACKOFF_MS: u64 = 4_000;
const UPLOAD_OFFSET_HEADER: &str = "upload-offset";
const DEVICE_ID_HEADER: &str = "x-tandem-device-id";

/// Request timeout from `TANDEM_REQUEST_TIMEOUT_SECS`, falling back to the
/// default when unset or invalid.
pub fn request_timeout_from_env() -> Duration {
    let secs = match std::env::var(TIMEOUT_ENV) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => value,
            _ => {
                warn!(
                    "[DeviceSync] Ignoring invalid {}={:?}, using {}s",
                    TIMEOUT_ENV, raw, DEFAULT_TIMEOUT_SECS
                );
                DEFAULT_TIMEOUT_SECS
            }
        },
        Err(_) => DEFAULT_TIMEOUT_SECS,
    };
    Duration::from_secs(secs)
}

/// Base URL for a server domain. Full URLs are accepted as is.
fn server_url(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else {
        format!("https://{}", server)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

fn backoff_with_jitter(attempt: usize) -> Duration {
    let exp = (attempt.saturating_sub(1) as u32).min(8);
    let backoff =
        (CHUNK_BASE_BACKOFF_MS.saturating_mul(1_u64 << exp)).min(CHUNK_MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..=(backoff / 5).max(1));
    Duration::from_millis(backoff.saturating_add(jitter))
}

#[derive(Debug, Clone)]
pub struct DeviceSyncClient {
    client: reqwest::Client,
    upload_chunk_bytes: usize,
}

impl DeviceSyncClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            upload_chunk_bytes: DEFAULT_UPLOAD_CHUNK_BYTES,
        })
    }

    /// Client configured from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(request_timeout_from_env())
    }

    /// Size of each upload request body.
    pub fn with_upload_chunk_size(mut self, bytes: usize) -> Self {
        self.upload_chunk_bytes = bytes.max(1);
        self
    }

    fn log_response(status: StatusCode, body: &str) {
        if status.is_success() {
            debug!("[DeviceSync] API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[DeviceSync] API response error ({}): {}", status, preview);
    }

    fn headers(&self, token: &str, device_id: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| DeviceSyncError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        if let Some(device_id) = device_id {
            let device_id_value = HeaderValue::from_str(device_id)
                .map_err(|_| DeviceSyncError::auth("Invalid device ID format"))?;
            headers.insert(DEVICE_ID_HEADER, device_id_value);
        }

        Ok(headers)
    }

    fn account_headers(&self, account: &Account) -> Result<HeaderMap> {
        self.headers(&account.token, Some(&account.device_id))
    }

    fn api_error(status: StatusCode, body: &str) -> DeviceSyncError {
        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(body) {
            return DeviceSyncError::api(
                status.as_u16(),
                format!("{}: {}", error.code, error.message),
            );
        }
        DeviceSyncError::api(status.as_u16(), format!("Request failed: {}", body))
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(Self::api_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!("[DeviceSync] Failed to deserialize response: {}", e);
            DeviceSyncError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Passes successful responses through untouched so the body can be
    /// streamed.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await?;
        Self::log_response(status, &body);
        Err(Self::api_error(status, &body))
    }

    fn file_url(account: &Account, workspace_id: &str, file_id: &str) -> String {
        format!(
            "{}/client/v1/workspaces/{}/files/{}",
            server_url(&account.server),
            urlencoding::encode(workspace_id),
            urlencoding::encode(file_id)
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Servers and accounts
    // ─────────────────────────────────────────────────────────────────────────

    /// GET /config
    pub async fn get_server_config(&self, server: &str) -> Result<ServerConfig> {
        let url = format!("{}/config", server_url(server));
        let response = self.client.get(&url).send().await?;
        Self::parse_response(response).await
    }

    /// POST /client/v1/accounts/sync
    pub async fn refresh_account(&self, account: &Account) -> Result<AccountProfile> {
        let url = format!("{}/client/v1/accounts/sync", server_url(&account.server));
        let response = self
            .client
            .post(&url)
            .headers(self.account_headers(account)?)
            .json(&AccountSyncRequest {
                device_id: &account.device_id,
            })
            .send()
            .await?;
        let body: AccountSyncResponse = Self::parse_response(response).await?;
        Ok(body.account)
    }

    /// DELETE /client/v1/accounts/logout
    pub async fn logout(&self, server: &str, token: &str) -> Result<()> {
        let url = format!("{}/client/v1/accounts/logout", server_url(server));
        let response = self
            .client
            .delete(&url)
            .headers(self.headers(token, None)?)
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbox
    // ─────────────────────────────────────────────────────────────────────────

    /// POST /client/v1/workspaces/{workspaceId}/mutations
    pub async fn send_mutations(
        &self,
        account: &Account,
        workspace_id: &str,
        mutations: &[Mutation],
    ) -> Result<Vec<MutationPushResult>> {
        let url = format!(
            "{}/client/v1/workspaces/{}/mutations",
            server_url(&account.server),
            urlencoding::encode(workspace_id)
        );
        debug!(
            "[DeviceSync] Pushing {} mutations for workspace {}",
            mutations.len(),
            workspace_id
        );
        let response = self
            .client
            .post(&url)
            .headers(self.account_headers(account)?)
            .json(&MutationsPushRequest { mutations })
            .send()
            .await?;
        let body: MutationsPushResponse = Self::parse_response(response).await?;
        Ok(body.results)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────

    /// HEAD /client/v1/workspaces/{workspaceId}/files/{fileId}
    ///
    /// A file the server has never seen has offset 0.
    pub async fn get_upload_offset(
        &self,
        account: &Account,
        workspace_id: &str,
        file_id: &str,
    ) -> Result<u64> {
        let url = Self::file_url(account, workspace_id, file_id);
        let response = self
            .client
            .head(&url)
            .headers(self.account_headers(account)?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let response = Self::check_response(response).await?;
        let Some(raw) = response.headers().get(UPLOAD_OFFSET_HEADER) else {
            return Ok(0);
        };
        raw.to_str()
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .ok_or_else(|| DeviceSyncError::invalid_request("Invalid upload-offset header"))
    }

    /// PATCH /client/v1/workspaces/{workspaceId}/files/{fileId}
    ///
    /// Sends the file from `offset` in chunks. Each chunk is retried on
    /// transient failures; the server keeps what it already received.
    pub async fn upload_from(
        &self,
        account: &Account,
        workspace_id: &str,
        file_id: &str,
        path: &Path,
        offset: u64,
        progress: ProgressCallback,
    ) -> Result<()> {
        let url = Self::file_url(account, workspace_id, file_id);
        let mut file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();
        if offset > total {
            return Err(DeviceSyncError::invalid_request(format!(
                "Upload offset {} is past the end of {} ({} bytes)",
                offset,
                path.display(),
                total
            )));
        }
        file.seek(SeekFrom::Start(offset)).await?;

        let mut sent = offset;
        loop {
            let mut chunk = Vec::with_capacity(self.upload_chunk_bytes.min(1 << 20));
            (&mut file)
                .take(self.upload_chunk_bytes as u64)
                .read_to_end(&mut chunk)
                .await?;
            let length = chunk.len() as u64;
            self.send_chunk(&url, account, sent, chunk).await?;
            sent += length;
            progress(sent, total);
            if sent >= total || length == 0 {
                break;
            }
        }

        debug!("[DeviceSync] Uploaded {} ({} bytes)", file_id, total);
        Ok(())
    }

    async fn send_chunk(
        &self,
        url: &str,
        account: &Account,
        offset: u64,
        chunk: Vec<u8>,
    ) -> Result<()> {
        let mut attempt = 0usize;
        loop {
            attempt = attempt.saturating_add(1);
            let mut headers = self.account_headers(account)?;
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/offset+octet-stream"),
            );
            headers.insert(
                UPLOAD_OFFSET_HEADER,
                HeaderValue::from_str(&offset.to_string())
                    .map_err(|_| DeviceSyncError::invalid_request("Invalid upload offset"))?,
            );

            let send_result = self
                .client
                .patch(url)
                .headers(headers)
                .body(chunk.clone())
                .send()
                .await;

            match send_result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let body = response.text().await?;
                    Self::log_response(status, &body);
                    if is_retryable_status(status.as_u16()) && attempt < CHUNK_MAX_ATTEMPTS {
                        debug!(
                            "[DeviceSync] Upload chunk retry {}/{} after HTTP {} (offset={})",
                            attempt + 1,
                            CHUNK_MAX_ATTEMPTS,
                            status.as_u16(),
                            offset
                        );
                        sleep(backoff_with_jitter(attempt)).await;
                        continue;
                    }
                    return Err(Self::api_error(status, &body));
                }
                Err(err) => {
                    if is_retryable_transport_error(&err) && attempt < CHUNK_MAX_ATTEMPTS {
                        debug!(
                            "[DeviceSync] Upload chunk retry {}/{} after transport error (offset={}): {}",
                            attempt + 1,
                            CHUNK_MAX_ATTEMPTS,
                            offset,
                            err
                        );
                        sleep(backoff_with_jitter(attempt)).await;
                        continue;
                    }
                    return Err(DeviceSyncError::Http(err));
                }
            }
        }
    }

    /// GET /client/v1/workspaces/{workspaceId}/files/{fileId}
    ///
    /// Appends to `path` from `offset`. A server that ignores the range
    /// restarts the file from the beginning.
    pub async fn download_from(
        &self,
        account: &Account,
        workspace_id: &str,
        file_id: &str,
        path: &Path,
        offset: u64,
        progress: ProgressCallback,
    ) -> Result<()> {
        let url = Self::file_url(account, workspace_id, file_id);
        let mut request = self.client.get(&url).headers(self.account_headers(account)?);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        let response = Self::check_response(request.send().await?).await?;

        let resumed = offset > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
        if offset > 0 && !resumed {
            debug!("[DeviceSync] Range ignored for {}, restarting download", file_id);
        }
        let start = if resumed { offset } else { 0 };
        let total = start + response.content_length().unwrap_or(0);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut options = OpenOptions::new();
        options.create(true);
        if resumed {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let mut file = options.open(path).await?;

        let mut received = start;
        let mut body = response.bytes_stream();
        while let Some(bytes) = body.next().await {
            let bytes = bytes?;
            file.write_all(&bytes).await?;
            received += bytes.len() as u64;
            progress(received, total.max(received));
        }
        file.flush().await?;

        debug!("[DeviceSync] Downloaded {} ({} bytes)", file_id, received);
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for DeviceSyncClient {
    async fn is_reachable(&self, server: &str) -> bool {
        match self.get_server_config(server).await {
            Ok(_) => true,
            Err(err) => {
                debug!("[DeviceSync] Server {} unreachable: {}", server, err);
                false
            }
        }
    }

    async fn fetch_server_config(&self, server: &str) -> tandem_core::Result<ServerConfig> {
        Ok(self.get_server_config(server).await?)
    }

    async fn sync_account(&self, account: &Account) -> tandem_core::Result<AccountProfile> {
        Ok(self.refresh_account(account).await?)
    }

    async fn push_mutations(
        &self,
        account: &Account,
        workspace_id: &str,
        mutations: &[Mutation],
    ) -> tandem_core::Result<Vec<MutationPushResult>> {
        Ok(self.send_mutations(account, workspace_id, mutations).await?)
    }

    async fn revoke_token(&self, server: &str, token: &str) -> tandem_core::Result<()> {
        Ok(self.logout(server, token).await?)
    }

    async fn upload_offset(
        &self,
        account: &Account,
        workspace_id: &str,
        file_id: &str,
    ) -> tandem_core::Result<u64> {
        Ok(self.get_upload_offset(account, workspace_id, file_id).await?)
    }

    async fn upload_file(&self, transfer: FileTransfer<'_>) -> tandem_core::Result<()> {
        Ok(self
            .upload_from(
                transfer.account,
                transfer.workspace_id,
                transfer.file_id,
                transfer.path,
                transfer.offset,
                transfer.progress,
            )
            .await?)
    }

    async fn download_file(&self, transfer: FileTransfer<'_>) -> tandem_core::Result<()> {
        Ok(self
            .download_from(
                transfer.account,
                transfer.workspace_id,
                transfer.file_id,
                transfer.path,
                transfer.offset,
                transfer.progress,
            )
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    use crate::error::ApiRetryClass;
    use tandem_core::mutations::{MutationData, MutationPushStatus};

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    }

    #[derive(Debug, Clone)]
    struct MockResponse {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
    }

    impl MockResponse {
        fn json(status: u16, body: &str) -> Self {
            Self {
                status,
                headers: vec![("Content-Type", "application/json".to_string())],
                body: body.as_bytes().to_vec(),
            }
        }

        fn empty(status: u16) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: Vec::new(),
            }
        }
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if header_end_offset(&buffer).is_some() {
                break;
            }
        }

        let header_end = header_end_offset(&buffer)?;
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines.next()?.to_string();
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?.to_string();
        let path = parts.next()?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buffer[header_end + 4..].to_vec();
        while body.len() < content_length {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Some(CapturedRequest {
            method,
            path,
            headers,
            body,
        })
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            204 => "No Content",
            206 => "Partial Content",
            401 => "Unauthorized",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "Error",
        }
    }

    async fn write_http_response(
        stream: &mut tokio::net::TcpStream,
        response: &MockResponse,
    ) -> std::io::Result<()> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, status_text(response.status));
        for (name, value) in &response.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            response.body.len()
        ));
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&response.body).await?;
        stream.flush().await
    }

    async fn start_mock_server(
        responses: Vec<MockResponse>,
    ) -> (
        String,
        Arc<TokioMutex<Vec<CapturedRequest>>>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(responses)));
        let captured_clone = Arc::clone(&captured);

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let Some(request) = read_http_request(&mut stream).await else {
                    continue;
                };
                captured_clone.lock().await.push(request);
                let response = scripted
                    .lock()
                    .await
                    .pop_front()
                    .unwrap_or_else(|| MockResponse::json(500, r#"{"code":"INTERNAL","message":"unexpected request"}"#));
                let _ = write_http_response(&mut stream, &response).await;
            }
        });

        (format!("http://{}", addr), captured, handle)
    }

    fn account(server: &str) -> Account {
        Account {
            id: "a1".to_string(),
            server: server.to_string(),
            email: "alice@example.com".to_string(),
            name: "Alice".to_string(),
            avatar: None,
            token: "secret".to_string(),
            device_id: "device-1".to_string(),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: None,
            synced_at: None,
        }
    }

    fn client() -> DeviceSyncClient {
        DeviceSyncClient::new(Duration::from_secs(5)).expect("client")
    }

    fn recording_progress() -> (ProgressCallback, Arc<Mutex<Vec<(u64, u64)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        });
        (callback, seen)
    }

    #[test]
    fn bare_domains_use_https() {
        assert_eq!(server_url("eu.tandem.test/"), "https://eu.tandem.test");
        assert_eq!(server_url("http://127.0.0.1:3000"), "http://127.0.0.1:3000");
    }

    #[tokio::test]
    async fn mutations_are_pushed_with_account_headers() {
        let (base_url, captured, server) = start_mock_server(vec![MockResponse::json(
            200,
            r#"{"results":[{"id":"m1","status":"accepted"}]}"#,
        )])
        .await;

        let mutation = Mutation {
            id: "m1".to_string(),
            workspace_id: "w1".to_string(),
            node_id: "n1".to_string(),
            data: MutationData::NodeDelete {
                node_id: "n1".to_string(),
                root_id: "space".to_string(),
                deleted_at: "2026-01-01T00:00:00.000Z".to_string(),
                deleted_by: "alice".to_string(),
            },
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            retries: 0,
        };
        let results = client()
            .push_mutations(&account(&base_url), "w1", &[mutation])
            .await
            .expect("push");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, MutationPushStatus::Accepted);
        let requests = captured.lock().await.clone();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/client/v1/workspaces/w1/mutations");
        assert_eq!(requests[0].headers.get("authorization").map(String::as_str), Some("Bearer secret"));
        assert_eq!(requests[0].headers.get(DEVICE_ID_HEADER).map(String::as_str), Some("device-1"));
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json body");
        assert_eq!(body["mutations"][0]["data"]["type"], "node.delete");
        server.abort();
    }

    #[tokio::test]
    async fn upload_resumes_from_the_server_offset_in_chunks() {
        let (base_url, captured, server) = start_mock_server(vec![
            MockResponse {
                status: 200,
                headers: vec![(UPLOAD_OFFSET_HEADER, "6".to_string())],
                body: Vec::new(),
            },
            MockResponse::empty(204),
            MockResponse::json(503, r#"{"code":"BUSY","message":"try again"}"#),
            MockResponse::empty(204),
        ])
        .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello world").expect("write");
        let account = account(&base_url);
        let client = client().with_upload_chunk_size(3);

        let offset = client.upload_offset(&account, "w1", "f1").await.expect("offset");
        assert_eq!(offset, 6);

        let (progress, seen) = recording_progress();
        client
            .upload_file(FileTransfer {
                account: &account,
                workspace_id: "w1",
                file_id: "f1",
                path: &path,
                offset,
                progress,
            })
            .await
            .expect("upload");

        let requests = captured.lock().await.clone();
        let patches: Vec<&CapturedRequest> =
            requests.iter().filter(|r| r.method == "PATCH").collect();
        assert_eq!(patches.len(), 3);
        assert_eq!(patches[0].body, b"wor");
        assert_eq!(patches[0].headers.get(UPLOAD_OFFSET_HEADER).map(String::as_str), Some("6"));
        // The retried chunk carries the same offset and bytes.
        assert_eq!(patches[1].body, b"ld");
        assert_eq!(patches[2].body, b"ld");
        assert_eq!(patches[2].headers.get(UPLOAD_OFFSET_HEADER).map(String::as_str), Some("9"));
        assert_eq!(*seen.lock().unwrap(), vec![(9, 11), (11, 11)]);
        server.abort();
    }

    #[tokio::test]
    async fn unknown_upload_has_offset_zero() {
        let (base_url, _captured, server) =
            start_mock_server(vec![MockResponse::empty(404)]).await;
        let offset = client()
            .get_upload_offset(&account(&base_url), "w1", "f1")
            .await
            .expect("offset");
        assert_eq!(offset, 0);
        server.abort();
    }

    #[tokio::test]
    async fn download_appends_the_requested_range() {
        let (base_url, captured, server) = start_mock_server(vec![MockResponse {
            status: 206,
            headers: vec![("Content-Type", "application/octet-stream".to_string())],
            body: b"world".to_vec(),
        }])
        .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("downloads").join("notes.txt");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, b"hello ").expect("partial");

        let (progress, seen) = recording_progress();
        client()
            .download_file(FileTransfer {
                account: &account(&base_url),
                workspace_id: "w1",
                file_id: "f1",
                path: &path,
                offset: 6,
                progress,
            })
            .await
            .expect("download");

        assert_eq!(std::fs::read(&path).expect("read"), b"hello world");
        let requests = captured.lock().await.clone();
        assert_eq!(requests[0].headers.get("range").map(String::as_str), Some("bytes=6-"));
        assert_eq!(seen.lock().unwrap().last().copied(), Some((11, 11)));
        server.abort();
    }

    #[tokio::test]
    async fn download_restarts_when_range_is_ignored() {
        let (base_url, _captured, server) = start_mock_server(vec![MockResponse {
            status: 200,
            headers: Vec::new(),
            body: b"fresh".to_vec(),
        }])
        .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"stale-partial").expect("partial");

        let (progress, _seen) = recording_progress();
        client()
            .download_from(&account(&base_url), "w1", "f1", &path, 13, progress)
            .await
            .expect("download");
        assert_eq!(std::fs::read(&path).expect("read"), b"fresh");
        server.abort();
    }

    #[tokio::test]
    async fn rejected_token_is_a_permanent_remote_error() {
        let (base_url, _captured, server) = start_mock_server(vec![MockResponse::json(
            401,
            r#"{"code":"UNAUTHORIZED","message":"token revoked"}"#,
        )])
        .await;

        let err = client()
            .refresh_account(&account(&base_url))
            .await
            .expect_err("unauthorized");
        assert_eq!(err.retry_class(), ApiRetryClass::ReauthRequired);
        assert_eq!(err.status_code(), Some(401));

        let core: tandem_core::Error = err.into();
        assert!(core.is_permanent());
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_server_reports_false() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        assert!(!client().is_reachable(&format!("http://{}", addr)).await);
    }
}
