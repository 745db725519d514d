//! In-process record source. Keeps the replication log in memory and applies
//! the same visibility rules a database-backed source would.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};

use tandem_core::interactions::merge::merge_attribute;
use tandem_core::sync::{
    CollaborationRecord, DeletedCollaborationRecord, InteractionEventPayload, InteractionRecord,
    TransactionRecord,
};
use tandem_core::Result;

use crate::source::{InteractionWriter, SyncRecordSource, SyncUser};

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Default)]
struct MemoryState {
    version: i64,
    transactions: Vec<TransactionRecord>,
    collaborations: Vec<CollaborationRecord>,
    deleted_collaborations: Vec<DeletedCollaborationRecord>,
    interactions: HashMap<(String, String), InteractionRecord>,
}

impl MemoryState {
    fn next_version(&mut self) -> i64 {
        self.version += 1;
        self.version
    }

    /// Roots `user` currently collaborates on.
    fn roots_of(&self, user: &SyncUser) -> HashSet<String> {
        self.collaborations
            .iter()
            .filter(|c| c.workspace_id == user.workspace_id && c.collaborator_id == user.user_id)
            .map(|c| c.node_id.clone())
            .collect()
    }
}

#[derive(Default)]
pub struct MemorySyncSource {
    state: Mutex<MemoryState>,
    global_node_types: HashSet<String>,
}

impl MemorySyncSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transactions of this node type are visible to every workspace user.
    pub fn with_global_node_type(mut self, node_type: impl Into<String>) -> Self {
        self.global_node_types.insert(node_type.into());
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends to the transaction log, assigning the next version.
    pub fn append_transaction(&self, mut transaction: TransactionRecord) -> TransactionRecord {
        let mut state = self.state();
        transaction.version = state.next_version();
        state.transactions.push(transaction.clone());
        transaction
    }

    /// Grants `collaborator_id` access to the tree under `root_id`.
    pub fn grant(
        &self,
        workspace_id: &str,
        root_id: &str,
        collaborator_id: &str,
        role: &str,
    ) -> CollaborationRecord {
        let mut state = self.state();
        let version = state.next_version();
        state
            .collaborations
            .retain(|c| !(c.node_id == root_id && c.collaborator_id == collaborator_id));
        let record = CollaborationRecord {
            node_id: root_id.to_string(),
            collaborator_id: collaborator_id.to_string(),
            workspace_id: workspace_id.to_string(),
            role: role.to_string(),
            version,
            created_at: now(),
        };
        state.collaborations.push(record.clone());
        record
    }

    /// Removes a grant. Returns `None` when there was nothing to revoke.
    pub fn revoke(
        &self,
        workspace_id: &str,
        root_id: &str,
        collaborator_id: &str,
    ) -> Option<DeletedCollaborationRecord> {
        let mut state = self.state();
        let before = state.collaborations.len();
        state
            .collaborations
            .retain(|c| !(c.node_id == root_id && c.collaborator_id == collaborator_id));
        if state.collaborations.len() == before {
            return None;
        }
        let version = state.next_version();
        let record = DeletedCollaborationRecord {
            node_id: root_id.to_string(),
            collaborator_id: collaborator_id.to_string(),
            workspace_id: workspace_id.to_string(),
            version,
            deleted_at: now(),
        };
        state.deleted_collaborations.push(record.clone());
        Some(record)
    }

    pub fn interaction(&self, node_id: &str, collaborator_id: &str) -> Option<InteractionRecord> {
        self.state()
            .interactions
            .get(&(node_id.to_string(), collaborator_id.to_string()))
            .cloned()
    }
}

fn after<T: Clone>(
    records: impl Iterator<Item = T>,
    version: impl Fn(&T) -> i64,
    cursor: i64,
    limit: usize,
) -> Vec<T> {
    let mut selected: Vec<T> = records.filter(|r| version(r) > cursor).collect();
    selected.sort_by_key(|r| version(r));
    selected.truncate(limit);
    selected
}

#[async_trait]
impl SyncRecordSource for MemorySyncSource {
    async fn transactions_after(
        &self,
        user: &SyncUser,
        cursor: i64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>> {
        let state = self.state();
        let roots = state.roots_of(user);
        let visible = state.transactions.iter().filter(|t| {
            t.workspace_id == user.workspace_id
                && (roots.contains(&t.root_id) || self.global_node_types.contains(&t.node_type))
        });
        Ok(after(visible.cloned(), |t| t.version, cursor, limit))
    }

    async fn collaborations_after(
        &self,
        user: &SyncUser,
        cursor: i64,
        limit: usize,
    ) -> Result<Vec<CollaborationRecord>> {
        let state = self.state();
        let own = state.collaborations.iter().filter(|c| {
            c.workspace_id == user.workspace_id && c.collaborator_id == user.user_id
        });
        Ok(after(own.cloned(), |c| c.version, cursor, limit))
    }

    async fn deleted_collaborations_after(
        &self,
        user: &SyncUser,
        cursor: i64,
        limit: usize,
    ) -> Result<Vec<DeletedCollaborationRecord>> {
        let state = self.state();
        let own = state.deleted_collaborations.iter().filter(|c| {
            c.workspace_id == user.workspace_id && c.collaborator_id == user.user_id
        });
        Ok(after(own.cloned(), |c| c.version, cursor, limit))
    }

    async fn interactions_after(
        &self,
        user: &SyncUser,
        cursor: i64,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>> {
        let state = self.state();
        let roots = state.roots_of(user);
        let visible = state
            .interactions
            .values()
            .filter(|i| i.workspace_id == user.workspace_id && roots.contains(&i.root_id));
        Ok(after(visible.cloned(), |i| i.version, cursor, limit))
    }
}

#[async_trait]
impl InteractionWriter for MemorySyncSource {
    async fn write_events(
        &self,
        user: &SyncUser,
        events: Vec<InteractionEventPayload>,
    ) -> Result<Vec<InteractionRecord>> {
        let mut state = self.state();
        let mut changed: Vec<(String, String)> = Vec::new();

        for event in events {
            let key = (event.node_id.clone(), user.user_id.clone());
            let mut attributes = state
                .interactions
                .get(&key)
                .map(|i| i.attributes.clone())
                .unwrap_or_default();
            if !merge_attribute(&mut attributes, event.attribute, &event.value) {
                continue;
            }

            let version = state.next_version();
            let timestamp = now();
            let record = match state.interactions.get(&key) {
                Some(existing) => InteractionRecord {
                    attributes,
                    version,
                    updated_at: Some(timestamp),
                    ..existing.clone()
                },
                None => InteractionRecord {
                    node_id: event.node_id.clone(),
                    root_id: event.root_id.clone(),
                    collaborator_id: user.user_id.clone(),
                    workspace_id: user.workspace_id.clone(),
                    attributes,
                    version,
                    created_at: timestamp,
                    updated_at: None,
                },
            };
            state.interactions.insert(key.clone(), record);
            if !changed.contains(&key) {
                changed.push(key);
            }
        }

        Ok(changed
            .iter()
            .filter_map(|key| state.interactions.get(key).cloned())
            .collect())
    }
}
