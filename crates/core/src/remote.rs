//! Seam to the central server. Implemented over HTTP by `tandem-device-sync`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::accounts::{Account, AccountProfile, ServerConfig};
use crate::errors::Result;
use crate::mutations::{Mutation, MutationPushResult};

/// Called with `(bytes transferred so far, total bytes)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// One resumable file transfer. `offset` bytes are already on the other side.
pub struct FileTransfer<'a> {
    pub account: &'a Account,
    pub workspace_id: &'a str,
    pub file_id: &'a str,
    pub path: &'a Path,
    pub offset: u64,
    pub progress: ProgressCallback,
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn is_reachable(&self, server: &str) -> bool;

    async fn fetch_server_config(&self, server: &str) -> Result<ServerConfig>;

    async fn sync_account(&self, account: &Account) -> Result<AccountProfile>;

    async fn push_mutations(
        &self,
        account: &Account,
        workspace_id: &str,
        mutations: &[Mutation],
    ) -> Result<Vec<MutationPushResult>>;

    async fn revoke_token(&self, server: &str, token: &str) -> Result<()>;

    /// Bytes of `file_id` the server already holds from an earlier attempt.
    async fn upload_offset(&self, account: &Account, workspace_id: &str, file_id: &str) -> Result<u64>;

    /// Sends `path` from `offset` to the end.
    async fn upload_file(&self, transfer: FileTransfer<'_>) -> Result<()>;

    /// Appends the remote bytes from `offset` onwards to `path`.
    async fn download_file(&self, transfer: FileTransfer<'_>) -> Result<()>;
}
