//! In-memory repositories and a scriptable remote for unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;

use crate::accounts::{
    Account, AccountProfile, AccountRepositoryTrait, DeletedToken, Server, ServerConfig,
};
use crate::errors::{MutationError, RemoteError, Result};
use crate::events::{DomainEvent, EventBus, InMemoryEventBus};
use crate::interactions::{
    Interaction, InteractionEvent, InteractionRepositoryTrait,
    LocalInteractionWrite, ServerInteractionWrite,
};
use crate::jobs::{Job, JobInput, JobStatus, DEFAULT_QUEUE};
use crate::mutations::{
    Mutation, MutationPushResult, MutationPushStatus, MutationRepositoryTrait, NewMutation,
};
use crate::nodes::{
    Collaboration, Node, NodeCreateWrite, NodeDeleteWrite, NodeRepositoryTrait, NodeType,
    NodeUpdateWrite,
};
use crate::remote::{FileTransfer, RemoteApi};
use crate::sync::{SyncConsumerType, SyncCursorRepositoryTrait};
use crate::transfers::{
    Download, DownloadStatus, TransferFailure, TransferRepositoryTrait, Upload, UploadStatus,
};
use crate::utils::time::now_db_timestamp;

pub(crate) fn job(input: JobInput) -> Job {
    let now = Utc::now();
    Job {
        id: uuid::Uuid::now_v7().to_string(),
        queue: DEFAULT_QUEUE.to_string(),
        input,
        status: JobStatus::Active,
        retries: 0,
        max_retries: 5,
        scheduled_at: now,
        deduplication_key: None,
        concurrency_key: None,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn account(id: &str, server: &str) -> Account {
    Account {
        id: id.to_string(),
        server: server.to_string(),
        email: format!("{}@example.com", id),
        name: id.to_string(),
        avatar: None,
        token: format!("token-{}", id),
        device_id: "device-1".to_string(),
        created_at: now_db_timestamp(),
        updated_at: None,
        synced_at: None,
    }
}

pub(crate) fn node(id: &str, node_type: NodeType, parent_id: Option<&str>, root_id: &str) -> Node {
    let mut attributes = serde_json::Map::new();
    attributes.insert("type".to_string(), serde_json::json!(node_type.as_str()));
    attributes.insert("name".to_string(), serde_json::json!(id));
    Node {
        id: id.to_string(),
        node_type,
        parent_id: parent_id.map(str::to_string),
        root_id: root_id.to_string(),
        workspace_id: "w1".to_string(),
        attributes,
        state: Vec::new(),
        local_revision: 1,
        server_revision: 0,
        created_at: now_db_timestamp(),
        created_by: "alice".to_string(),
        updated_at: None,
        updated_by: None,
    }
}

/// Bus plus a log of everything published on it.
pub(crate) fn recording_bus() -> (Arc<InMemoryEventBus>, Arc<Mutex<Vec<DomainEvent>>>) {
    let bus = Arc::new(InMemoryEventBus::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    bus.subscribe(Arc::new(move |event| sink.lock().unwrap().push(event.clone())));
    (bus, events)
}

#[derive(Default)]
pub(crate) struct MemoryNodes {
    pub nodes: Mutex<HashMap<String, Node>>,
    pub mutations: Mutex<Vec<NewMutation>>,
    pub collaborations: Mutex<Vec<Collaboration>>,
    pub always_conflict: AtomicBool,
    pub update_calls: AtomicUsize,
}

#[async_trait]
impl NodeRepositoryTrait for MemoryNodes {
    fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        Ok(self.nodes.lock().unwrap().get(node_id).cloned())
    }

    fn list_children(&self, parent_id: &str) -> Result<Vec<Node>> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }

    fn get_collaboration(&self, node_id: &str, collaborator_id: &str) -> Result<Option<Collaboration>> {
        Ok(self
            .collaborations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.node_id == node_id && c.collaborator_id == collaborator_id)
            .cloned())
    }

    async fn create_node(&self, write: NodeCreateWrite) -> Result<Node> {
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&write.node.id) {
            return Err(MutationError::AlreadyExists(write.node.id).into());
        }
        nodes.insert(write.node.id.clone(), write.node.clone());
        if let Some(mutation) = write.mutation {
            self.mutations.lock().unwrap().push(mutation);
        }
        Ok(write.node)
    }

    async fn update_node(&self, write: NodeUpdateWrite) -> Result<Option<Node>> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.always_conflict.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut nodes = self.nodes.lock().unwrap();
        let Some(node) = nodes.get_mut(&write.node_id) else {
            return Ok(None);
        };
        if node.local_revision != write.expected_revision {
            return Ok(None);
        }
        node.attributes = write.attributes;
        node.state = write.state;
        node.local_revision += 1;
        node.updated_at = Some(write.updated_at);
        node.updated_by = Some(write.updated_by);
        if let Some(revision) = write.server_revision {
            node.server_revision = revision;
        }
        if let Some(mutation) = write.mutation {
            self.mutations.lock().unwrap().push(mutation);
        }
        Ok(Some(node.clone()))
    }

    async fn delete_node(&self, write: NodeDeleteWrite) -> Result<bool> {
        let removed = self.nodes.lock().unwrap().remove(&write.node_id).is_some();
        if removed {
            if let Some(mutation) = write.mutation {
                self.mutations.lock().unwrap().push(mutation);
            }
        }
        Ok(removed)
    }

    async fn delete_nodes_by_root(&self, root_id: &str) -> Result<usize> {
        let mut nodes = self.nodes.lock().unwrap();
        let before = nodes.len();
        nodes.retain(|_, n| n.root_id != root_id);
        Ok(before - nodes.len())
    }

    async fn upsert_collaboration(&self, collaboration: Collaboration) -> Result<()> {
        let mut all = self.collaborations.lock().unwrap();
        all.retain(|c| {
            !(c.node_id == collaboration.node_id && c.collaborator_id == collaboration.collaborator_id)
        });
        all.push(collaboration);
        Ok(())
    }

    async fn delete_collaboration(&self, node_id: &str, collaborator_id: &str) -> Result<bool> {
        let mut all = self.collaborations.lock().unwrap();
        let before = all.len();
        all.retain(|c| !(c.node_id == node_id && c.collaborator_id == collaborator_id));
        Ok(all.len() != before)
    }
}


#[derive(Default)]
pub(crate) struct MemoryAccounts {
    pub accounts: Mutex<HashMap<String, Account>>,
    pub servers: Mutex<HashMap<String, Server>>,
    pub deleted_tokens: Mutex<Vec<DeletedToken>>,
}

#[async_trait]
impl AccountRepositoryTrait for MemoryAccounts {
    fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        Ok(self.accounts.lock().unwrap().get(account_id).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.lock().unwrap().values().cloned().collect())
    }

    async fn insert_account(&self, account: Account) -> Result<Account> {
        self.accounts
            .lock()
            .unwrap()
            .insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn update_account_profile(
        &self,
        account_id: &str,
        profile: AccountProfile,
        synced_at: String,
    ) -> Result<Option<Account>> {
        let mut accounts = self.accounts.lock().unwrap();
        let Some(account) = accounts.get_mut(account_id) else {
            return Ok(None);
        };
        account.name = profile.name;
        account.email = profile.email;
        account.avatar = profile.avatar;
        account.synced_at = Some(synced_at);
        Ok(Some(account.clone()))
    }

    async fn delete_account(&self, account_id: &str) -> Result<Option<DeletedToken>> {
        let Some(account) = self.accounts.lock().unwrap().remove(account_id) else {
            return Ok(None);
        };
        let token = DeletedToken {
            token: account.token,
            account_id: account.id,
            server: account.server,
            created_at: now_db_timestamp(),
        };
        self.deleted_tokens.lock().unwrap().push(token.clone());
        Ok(Some(token))
    }

    fn get_server(&self, domain: &str) -> Result<Option<Server>> {
        Ok(self.servers.lock().unwrap().get(domain).cloned())
    }

    async fn upsert_server(&self, server: Server) -> Result<Server> {
        self.servers
            .lock()
            .unwrap()
            .insert(server.domain.clone(), server.clone());
        Ok(server)
    }

    fn list_deleted_tokens(&self) -> Result<Vec<DeletedToken>> {
        Ok(self.deleted_tokens.lock().unwrap().clone())
    }

    async fn delete_deleted_token(&self, token: &str) -> Result<bool> {
        let mut tokens = self.deleted_tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|t| t.token != token);
        Ok(tokens.len() != before)
    }
}

#[derive(Default)]
pub(crate) struct MemoryTransfers {
    pub uploads: Mutex<HashMap<String, Upload>>,
    pub downloads: Mutex<HashMap<String, Download>>,
}

#[async_trait]
impl TransferRepositoryTrait for MemoryTransfers {
    fn get_upload(&self, file_id: &str) -> Result<Option<Upload>> {
        Ok(self.uploads.lock().unwrap().get(file_id).cloned())
    }

    fn get_download(&self, file_id: &str) -> Result<Option<Download>> {
        Ok(self.downloads.lock().unwrap().get(file_id).cloned())
    }

    fn list_failed_uploads(&self, workspace_id: &str) -> Result<Vec<Upload>> {
        Ok(self
            .uploads
            .lock()
            .unwrap()
            .values()
            .filter(|u| u.workspace_id == workspace_id && u.status == UploadStatus::Failed)
            .cloned()
            .collect())
    }

    async fn create_download(&self, download: Download) -> Result<Download> {
        let mut downloads = self.downloads.lock().unwrap();
        Ok(downloads
            .entry(download.file_id.clone())
            .or_insert(download)
            .clone())
    }

    async fn update_upload_progress(
        &self,
        file_id: &str,
        status: UploadStatus,
        progress: i32,
    ) -> Result<Option<Upload>> {
        let mut uploads = self.uploads.lock().unwrap();
        Ok(uploads.get_mut(file_id).map(|upload| {
            upload.status = status;
            upload.progress = progress;
            upload.clone()
        }))
    }

    async fn update_download_progress(
        &self,
        file_id: &str,
        status: DownloadStatus,
        progress: i32,
    ) -> Result<Option<Download>> {
        let mut downloads = self.downloads.lock().unwrap();
        Ok(downloads.get_mut(file_id).map(|download| {
            download.status = status;
            download.progress = progress;
            download.clone()
        }))
    }

    async fn record_upload_failure(&self, failure: TransferFailure) -> Result<Option<Upload>> {
        let mut uploads = self.uploads.lock().unwrap();
        Ok(uploads.get_mut(&failure.file_id).map(|upload| {
            upload.retries = failure.retries;
            upload.error_code = Some(failure.error_code);
            upload.error_message = Some(failure.error_message);
            if failure.terminal {
                upload.status = UploadStatus::Failed;
                upload.progress = 0;
            } else {
                upload.status = UploadStatus::Pending;
            }
            upload.clone()
        }))
    }

    async fn record_download_failure(&self, failure: TransferFailure) -> Result<Option<Download>> {
        let mut downloads = self.downloads.lock().unwrap();
        Ok(downloads.get_mut(&failure.file_id).map(|download| {
            download.retries = failure.retries;
            download.error_code = Some(failure.error_code);
            download.error_message = Some(failure.error_message);
            if failure.terminal {
                download.status = DownloadStatus::Failed;
                download.progress = 0;
            } else {
                download.status = DownloadStatus::Pending;
            }
            download.clone()
        }))
    }

    async fn delete_upload(&self, file_id: &str) -> Result<()> {
        self.uploads.lock().unwrap().remove(file_id);
        Ok(())
    }

    async fn delete_download(&self, file_id: &str) -> Result<()> {
        self.downloads.lock().unwrap().remove(file_id);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryMutations {
    pub rows: Mutex<Vec<Mutation>>,
}

impl MemoryMutations {
    pub fn push(&self, mutation: NewMutation) {
        self.rows.lock().unwrap().push(Mutation {
            node_id: mutation.node_id().to_string(),
            id: mutation.id,
            workspace_id: mutation.workspace_id,
            data: mutation.data,
            created_at: mutation.created_at,
            retries: 0,
        });
    }

    pub fn ids(&self) -> Vec<String> {
        self.rows.lock().unwrap().iter().map(|m| m.id.clone()).collect()
    }
}

#[async_trait]
impl MutationRepositoryTrait for MemoryMutations {
    fn list_pending_mutations(&self, workspace_id: &str, limit: i64) -> Result<Vec<Mutation>> {
        let mut rows: Vec<Mutation> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.workspace_id == workspace_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    fn count_mutations_for_node(&self, node_id: &str) -> Result<i64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.node_id == node_id)
            .count() as i64)
    }

    async fn delete_mutations(&self, ids: Vec<String>) -> Result<usize> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|m| !ids.contains(&m.id));
        Ok(before - rows.len())
    }

    async fn mark_mutations_failed(&self, ids: Vec<String>, max_retries: i32) -> Result<usize> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut().filter(|m| ids.contains(&m.id)) {
            row.retries += 1;
        }
        let before = rows.len();
        rows.retain(|m| m.retries < max_retries);
        Ok(before - rows.len())
    }
}

#[derive(Default)]
pub(crate) struct MemoryInteractions {
    pub interactions: Mutex<HashMap<(String, String), Interaction>>,
    pub events: Mutex<Vec<InteractionEvent>>,
}

#[async_trait]
impl InteractionRepositoryTrait for MemoryInteractions {
    fn get_interaction(&self, node_id: &str, collaborator_id: &str) -> Result<Option<Interaction>> {
        Ok(self
            .interactions
            .lock()
            .unwrap()
            .get(&(node_id.to_string(), collaborator_id.to_string()))
            .cloned())
    }

    fn list_pending_events(&self, node_id: &str) -> Result<Vec<InteractionEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.node_id == node_id)
            .cloned()
            .collect())
    }

    fn list_events_to_send(&self, resend_before: &str, limit: i64) -> Result<Vec<InteractionEvent>> {
        let mut events: Vec<InteractionEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.sent_at.as_deref().map_or(true, |sent| sent < resend_before))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn write_local_interaction(&self, write: LocalInteractionWrite) -> Result<bool> {
        let key = (
            write.interaction.node_id.clone(),
            write.interaction.collaborator_id.clone(),
        );
        let mut interactions = self.interactions.lock().unwrap();
        if interactions.get(&key).map(|i| i.version) != write.expected_version {
            return Ok(false);
        }
        interactions.insert(key, write.interaction);
        let mut events = self.events.lock().unwrap();
        events.retain(|e| !(e.node_id == write.event.node_id && e.attribute == write.event.attribute));
        events.push(write.event);
        Ok(true)
    }

    async fn write_server_interaction(&self, write: ServerInteractionWrite) -> Result<bool> {
        let key = (
            write.interaction.node_id.clone(),
            write.interaction.collaborator_id.clone(),
        );
        let mut interactions = self.interactions.lock().unwrap();
        if interactions.get(&key).map(|i| i.version) != write.expected_version {
            return Ok(false);
        }
        let node_id = write.interaction.node_id.clone();
        interactions.insert(key, write.interaction);
        self.events
            .lock()
            .unwrap()
            .retain(|e| !(e.node_id == node_id && write.pruned_events.contains(&e.attribute)));
        Ok(true)
    }

    async fn mark_events_sent(&self, event_ids: Vec<String>, sent_at: String) -> Result<()> {
        for event in self.events.lock().unwrap().iter_mut() {
            if event_ids.contains(&event.event_id) {
                event.sent_at = Some(sent_at.clone());
                event.sent_count += 1;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryCursors {
    pub cursors: Mutex<HashMap<(String, SyncConsumerType), i64>>,
}

#[async_trait]
impl SyncCursorRepositoryTrait for MemoryCursors {
    fn get_cursor(&self, user_id: &str, consumer: SyncConsumerType) -> Result<i64> {
        Ok(self
            .cursors
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), consumer))
            .copied()
            .unwrap_or(0))
    }

    async fn set_cursor(&self, user_id: &str, consumer: SyncConsumerType, cursor: i64) -> Result<()> {
        let mut cursors = self.cursors.lock().unwrap();
        let entry = cursors.entry((user_id.to_string(), consumer)).or_insert(0);
        *entry = (*entry).max(cursor);
        Ok(())
    }
}

/// Remote whose answers are set per test.
pub(crate) struct FakeRemote {
    pub reachable: AtomicBool,
    pub fail_transfers: AtomicBool,
    pub reject_revocation: AtomicBool,
    pub upload_offset: AtomicU64,
    pub remote_bytes: Mutex<Vec<u8>>,
    pub profile: Mutex<Option<AccountProfile>>,
    pub server_config: Mutex<Option<ServerConfig>>,
    /// Status reported for every pushed mutation; `None` fails the whole push.
    pub push_status: Mutex<Option<MutationPushStatus>>,
    pub pushed_batches: Mutex<Vec<Vec<String>>>,
    pub uploads: Mutex<Vec<(String, u64)>>,
    pub revoked: Mutex<Vec<String>>,
    pub transfer_calls: AtomicUsize,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            fail_transfers: AtomicBool::new(false),
            reject_revocation: AtomicBool::new(false),
            upload_offset: AtomicU64::new(0),
            remote_bytes: Mutex::new(Vec::new()),
            profile: Mutex::new(None),
            server_config: Mutex::new(None),
            push_status: Mutex::new(Some(MutationPushStatus::Accepted)),
            pushed_batches: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            revoked: Mutex::new(Vec::new()),
            transfer_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeRemote {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn transfer_attempt(&self) -> Result<()> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(RemoteError::retryable("connection reset").into());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn is_reachable(&self, _server: &str) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn fetch_server_config(&self, server: &str) -> Result<ServerConfig> {
        self.server_config
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RemoteError::retryable(format!("{} did not answer", server)).into())
    }

    async fn sync_account(&self, account: &Account) -> Result<AccountProfile> {
        Ok(self.profile.lock().unwrap().clone().unwrap_or(AccountProfile {
            name: account.name.clone(),
            email: account.email.clone(),
            avatar: account.avatar.clone(),
        }))
    }

    async fn push_mutations(
        &self,
        _account: &Account,
        _workspace_id: &str,
        mutations: &[Mutation],
    ) -> Result<Vec<MutationPushResult>> {
        self.pushed_batches
            .lock()
            .unwrap()
            .push(mutations.iter().map(|m| m.id.clone()).collect());
        let status = (*self.push_status.lock().unwrap())
            .ok_or_else(|| RemoteError::retryable("gateway timeout"))?;
        Ok(mutations
            .iter()
            .map(|m| MutationPushResult {
                id: m.id.clone(),
                status,
            })
            .collect())
    }

    async fn revoke_token(&self, _server: &str, token: &str) -> Result<()> {
        if self.reject_revocation.load(Ordering::SeqCst) {
            return Err(RemoteError::permanent(Some(401), "token unknown").into());
        }
        self.revoked.lock().unwrap().push(token.to_string());
        Ok(())
    }

    async fn upload_offset(&self, _account: &Account, _workspace_id: &str, _file_id: &str) -> Result<u64> {
        Ok(self.upload_offset.load(Ordering::SeqCst))
    }

    async fn upload_file(&self, transfer: FileTransfer<'_>) -> Result<()> {
        self.transfer_attempt()?;
        let total = tokio::fs::metadata(transfer.path).await?.len();
        (transfer.progress)(total / 2, total);
        (transfer.progress)(total, total);
        self.uploads
            .lock()
            .unwrap()
            .push((transfer.file_id.to_string(), transfer.offset));
        Ok(())
    }

    async fn download_file(&self, transfer: FileTransfer<'_>) -> Result<()> {
        self.transfer_attempt()?;
        let bytes = self.remote_bytes.lock().unwrap().clone();
        let start = (transfer.offset as usize).min(bytes.len());
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(transfer.path)
            .await?;
        file.write_all(&bytes[start..]).await?;
        file.flush().await?;
        (transfer.progress)(bytes.len() as u64, bytes.len() as u64);
        Ok(())
    }
}

pub(crate) async fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.expect("mkdir");
    }
    tokio::fs::write(path, bytes).await.expect("write");
}
