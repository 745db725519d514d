use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use super::ancestors::collect_ancestors;
use super::permissions::{can_create, can_delete, can_update};
use super::validation::validate_attributes;
use super::{
    Collaboration, CreateNodeInput, InitialTransfer, Node, NodeAttributes, NodeCreateWrite,
    NodeDeleteWrite, NodeRepositoryTrait, NodeType, NodeUpdateWrite,
};
use crate::context::WorkspaceContext;
use crate::document::NodeDocument;
use crate::errors::{Error, MutationError, Result, ValidationError};
use crate::events::{DomainEvent, EventBus};
use crate::mutations::{decode_bytes, encode_bytes, MutationData, NewMutation};
use crate::sync::{
    CollaborationRecord, DeletedCollaborationRecord, TransactionOperation, TransactionRecord,
};
use crate::transfers::{Download, DownloadType, Upload};
use crate::utils::time::now_db_timestamp;

/// Attempts before a conflicting update gives up.
pub const NODE_UPDATE_MAX_ATTEMPTS: usize = 20;

enum NodeChange {
    Created,
    Updated,
    Deleted,
}

/// Local mutation pipeline for one workspace.
///
/// Local writes derive exactly one change record inside the entity's own
/// transaction. Server-pushed changes take the apply-only path: the same
/// conditional writes, no change records.
pub struct NodeService {
    context: WorkspaceContext,
    repository: Arc<dyn NodeRepositoryTrait>,
    event_bus: Arc<dyn EventBus>,
}

impl NodeService {
    pub fn new(
        context: WorkspaceContext,
        repository: Arc<dyn NodeRepositoryTrait>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            context,
            repository,
            event_bus,
        }
    }

    pub fn context(&self) -> &WorkspaceContext {
        &self.context
    }

    pub fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        self.repository.get_node(node_id)
    }

    /// Root-first chain ending with `node_id` itself.
    pub fn get_ancestors(&self, node_id: &str) -> Result<Vec<Node>> {
        collect_ancestors(node_id, |id| self.repository.get_node(id))
    }

    pub async fn create_node(&self, input: CreateNodeInput) -> Result<Node> {
        let node_type = input
            .attributes
            .get("type")
            .and_then(Value::as_str)
            .and_then(NodeType::parse)
            .ok_or_else(|| {
                ValidationError::InvalidInput("type attribute is missing or unknown".to_string())
            })?;
        validate_attributes(node_type, &input.attributes)?;

        let id = input
            .id
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

        let chain = match &input.parent_id {
            Some(parent_id) => {
                let chain = self.get_ancestors(parent_id)?;
                let parent_type = chain
                    .last()
                    .map(|parent| parent.node_type)
                    .ok_or_else(|| Error::not_found(format!("Node {}", parent_id)))?;
                if !node_type.accepts_parent(parent_type) {
                    return Err(ValidationError::InvalidInput(format!(
                        "a {} cannot be created under a {}",
                        node_type, parent_type
                    ))
                    .into());
                }
                chain
            }
            None if node_type.requires_parent() => {
                return Err(MutationError::MissingParent(id).into());
            }
            None => Vec::new(),
        };
        let root_id = chain
            .first()
            .map(|root| root.id.clone())
            .unwrap_or_else(|| id.clone());

        if !can_create(&self.context, node_type, &input.attributes, &chain) {
            return Err(Error::permission_denied(format!(
                "User {} cannot create a {} here",
                self.context.user_id, node_type
            )));
        }

        let mut document = NodeDocument::create(id.clone());
        document.apply_attributes(&input.attributes);
        let state = document.encode_full_state();
        let now = now_db_timestamp();

        let (upload, download) = match input.transfer {
            None => (None, None),
            Some(_) if node_type != NodeType::File => {
                return Err(ValidationError::InvalidInput(format!(
                    "a {} node cannot carry a transfer",
                    node_type
                ))
                .into());
            }
            Some(InitialTransfer::Upload) => (
                Some(Upload::new(&id, &self.context.workspace_id, now.clone())),
                None,
            ),
            Some(InitialTransfer::Download { path }) => (
                None,
                Some(Download::new(
                    &id,
                    &self.context.workspace_id,
                    path,
                    DownloadType::Manual,
                    now.clone(),
                )),
            ),
        };

        let mutation = NewMutation::new(
            &self.context.workspace_id,
            MutationData::NodeCreate {
                node_id: id.clone(),
                node_type: node_type.to_string(),
                parent_id: input.parent_id.clone(),
                root_id: root_id.clone(),
                state: encode_bytes(&state),
                created_at: now.clone(),
                created_by: self.context.user_id.clone(),
            },
            now.clone(),
        );

        let node = Node {
            id,
            node_type,
            parent_id: input.parent_id,
            root_id,
            workspace_id: self.context.workspace_id.clone(),
            attributes: document.decode_attributes(),
            state,
            local_revision: 1,
            server_revision: 0,
            created_at: now,
            created_by: self.context.user_id.clone(),
            updated_at: None,
            updated_by: None,
        };

        let created = self
            .repository
            .create_node(NodeCreateWrite {
                node,
                mutation: Some(mutation),
                upload: upload.clone(),
                download: download.clone(),
            })
            .await?;

        info!("[Mutations] Created {} {}", created.node_type, created.id);
        self.publish_node_event(NodeChange::Created, &created);
        if let Some(upload) = upload {
            self.event_bus.publish(DomainEvent::UploadUpdated {
                workspace_id: upload.workspace_id,
                file_id: upload.file_id,
                status: upload.status,
                progress: upload.progress,
            });
        }
        if let Some(download) = download {
            self.event_bus.publish(DomainEvent::DownloadUpdated {
                workspace_id: download.workspace_id,
                file_id: download.file_id,
                status: download.status,
                progress: download.progress,
            });
        }
        Ok(created)
    }

    /// Read-modify-write of a node's attributes. `updater` may run once per
    /// attempt, each time against freshly read attributes. An update that
    /// changes nothing returns the stored node without writing.
    pub async fn update_node<F>(&self, node_id: &str, mut updater: F) -> Result<Node>
    where
        F: FnMut(NodeAttributes) -> Result<NodeAttributes> + Send,
    {
        for attempt in 1..=NODE_UPDATE_MAX_ATTEMPTS {
            let chain = self.get_ancestors(node_id)?;
            let node = chain
                .last()
                .cloned()
                .ok_or_else(|| Error::not_found(format!("Node {}", node_id)))?;

            if !can_update(&self.context, &node, &chain) {
                return Err(Error::permission_denied(format!(
                    "User {} cannot update {}",
                    self.context.user_id, node.id
                )));
            }

            let attributes = updater(node.attributes.clone())?;
            validate_attributes(node.node_type, &attributes)?;

            let mut document = NodeDocument::load(&node.id, &node.state)?;
            document.apply_attributes(&attributes);
            let Some(update) = document.encode_incremental_update() else {
                debug!("[Mutations] Update of {} changed nothing", node.id);
                return Ok(node);
            };

            let now = now_db_timestamp();
            let mutation = NewMutation::new(
                &self.context.workspace_id,
                MutationData::NodeUpdate {
                    node_id: node.id.clone(),
                    root_id: node.root_id.clone(),
                    update: encode_bytes(&update),
                    updated_at: now.clone(),
                    updated_by: self.context.user_id.clone(),
                },
                now.clone(),
            );

            let write = NodeUpdateWrite {
                node_id: node.id.clone(),
                expected_revision: node.local_revision,
                attributes: document.decode_attributes(),
                state: document.encode_full_state(),
                updated_at: now,
                updated_by: self.context.user_id.clone(),
                server_revision: None,
                mutation: Some(mutation),
            };

            match self.repository.update_node(write).await? {
                Some(updated) => {
                    self.publish_node_event(NodeChange::Updated, &updated);
                    return Ok(updated);
                }
                None => debug!(
                    "[Mutations] Version conflict on {} (attempt {}/{})",
                    node_id, attempt, NODE_UPDATE_MAX_ATTEMPTS
                ),
            }
        }

        warn!("[Mutations] Giving up on update of {}", node_id);
        Err(MutationError::ConflictRetriesExhausted {
            entity: "node",
            id: node_id.to_string(),
            attempts: NODE_UPDATE_MAX_ATTEMPTS,
        }
        .into())
    }

    pub async fn delete_node(&self, node_id: &str) -> Result<()> {
        let chain = self.get_ancestors(node_id)?;
        let node = chain
            .last()
            .cloned()
            .ok_or_else(|| Error::not_found(format!("Node {}", node_id)))?;

        if !can_delete(&self.context, &node, &chain) {
            return Err(Error::permission_denied(format!(
                "User {} cannot delete {}",
                self.context.user_id, node.id
            )));
        }

        let now = now_db_timestamp();
        let mutation = NewMutation::new(
            &self.context.workspace_id,
            MutationData::NodeDelete {
                node_id: node.id.clone(),
                root_id: node.root_id.clone(),
                deleted_at: now.clone(),
                deleted_by: self.context.user_id.clone(),
            },
            now,
        );

        let deleted = self
            .repository
            .delete_node(NodeDeleteWrite {
                node_id: node.id.clone(),
                mutation: Some(mutation),
            })
            .await?;
        if deleted {
            info!("[Mutations] Deleted {} {}", node.node_type, node.id);
            self.publish_node_event(NodeChange::Deleted, &node);
        }
        Ok(())
    }

    /// Applies one entry of the server's transaction log. Returns whether the
    /// local replica changed.
    pub async fn apply_server_transaction(&self, transaction: &TransactionRecord) -> Result<bool> {
        match transaction.operation {
            TransactionOperation::Create => self.apply_server_create(transaction).await,
            TransactionOperation::Update => {
                let update = transaction_bytes(transaction)?;
                self.merge_server_state(transaction, &update).await
            }
            TransactionOperation::Delete => {
                let existing = self.repository.get_node(&transaction.node_id)?;
                let deleted = self
                    .repository
                    .delete_node(NodeDeleteWrite {
                        node_id: transaction.node_id.clone(),
                        mutation: None,
                    })
                    .await?;
                if let (true, Some(node)) = (deleted, existing) {
                    self.publish_node_event(NodeChange::Deleted, &node);
                }
                Ok(deleted)
            }
        }
    }

    async fn apply_server_create(&self, transaction: &TransactionRecord) -> Result<bool> {
        let state = transaction_bytes(transaction)?;
        if self.repository.get_node(&transaction.node_id)?.is_some() {
            return self.merge_server_state(transaction, &state).await;
        }

        let node_type = NodeType::parse(&transaction.node_type).ok_or_else(|| {
            ValidationError::InvalidInput(format!("unknown node type {}", transaction.node_type))
        })?;
        let document = NodeDocument::load(&transaction.node_id, &state)?;
        let node = Node {
            id: transaction.node_id.clone(),
            node_type,
            parent_id: transaction.parent_id.clone(),
            root_id: transaction.root_id.clone(),
            workspace_id: transaction.workspace_id.clone(),
            attributes: document.decode_attributes(),
            state: document.encode_full_state(),
            local_revision: 1,
            server_revision: transaction.version,
            created_at: transaction.created_at.clone(),
            created_by: transaction.created_by.clone(),
            updated_at: None,
            updated_by: None,
        };

        let write = NodeCreateWrite {
            node,
            mutation: None,
            upload: None,
            download: None,
        };
        match self.repository.create_node(write).await {
            Ok(created) => {
                self.publish_node_event(NodeChange::Created, &created);
                Ok(true)
            }
            Err(Error::Mutation(MutationError::AlreadyExists(_))) => {
                self.merge_server_state(transaction, &state).await
            }
            Err(err) => Err(err),
        }
    }

    async fn merge_server_state(&self, transaction: &TransactionRecord, update: &[u8]) -> Result<bool> {
        for attempt in 1..=NODE_UPDATE_MAX_ATTEMPTS {
            let Some(node) = self.repository.get_node(&transaction.node_id)? else {
                debug!(
                    "[Mutations] Skipping server transaction {} for unknown node {}",
                    transaction.id, transaction.node_id
                );
                return Ok(false);
            };

            let mut document = NodeDocument::load(&node.id, &node.state)?;
            let advanced = document.apply_update(update)?;
            let attributes = document.decode_attributes();
            if !advanced && attributes == node.attributes {
                // Already integrated, usually the echo of our own mutation.
                debug!(
                    "[Mutations] Server transaction {} adds nothing to node {}",
                    transaction.id, node.id
                );
                return Ok(false);
            }

            let write = NodeUpdateWrite {
                node_id: node.id.clone(),
                expected_revision: node.local_revision,
                attributes,
                state: document.encode_full_state(),
                updated_at: transaction.created_at.clone(),
                updated_by: transaction.created_by.clone(),
                server_revision: Some(node.server_revision.max(transaction.version)),
                mutation: None,
            };
            match self.repository.update_node(write).await? {
                Some(updated) => {
                    self.publish_node_event(NodeChange::Updated, &updated);
                    return Ok(true);
                }
                None => debug!(
                    "[Mutations] Version conflict applying {} (attempt {}/{})",
                    transaction.id, attempt, NODE_UPDATE_MAX_ATTEMPTS
                ),
            }
        }

        Err(MutationError::ConflictRetriesExhausted {
            entity: "node",
            id: transaction.node_id.clone(),
            attempts: NODE_UPDATE_MAX_ATTEMPTS,
        }
        .into())
    }

    pub async fn apply_server_collaboration(&self, record: &CollaborationRecord) -> Result<()> {
        self.repository
            .upsert_collaboration(Collaboration {
                node_id: record.node_id.clone(),
                collaborator_id: record.collaborator_id.clone(),
                role: record.role.clone(),
                revision: record.version,
                created_at: record.created_at.clone(),
            })
            .await?;

        self.event_bus.publish(DomainEvent::CollaboratorAdded {
            workspace_id: record.workspace_id.clone(),
            node_id: record.node_id.clone(),
            collaborator_id: record.collaborator_id.clone(),
        });
        Ok(())
    }

    /// Losing access to a root drops the whole tree from the local replica.
    pub async fn apply_server_deleted_collaboration(
        &self,
        record: &DeletedCollaborationRecord,
    ) -> Result<()> {
        self.repository
            .delete_collaboration(&record.node_id, &record.collaborator_id)
            .await?;

        if record.collaborator_id == self.context.user_id {
            let removed = self.repository.delete_nodes_by_root(&record.node_id).await?;
            info!(
                "[Mutations] Access to {} revoked, removed {} nodes",
                record.node_id, removed
            );
        }

        self.event_bus.publish(DomainEvent::CollaboratorRemoved {
            workspace_id: record.workspace_id.clone(),
            node_id: record.node_id.clone(),
            collaborator_id: record.collaborator_id.clone(),
        });
        Ok(())
    }

    fn publish_node_event(&self, change: NodeChange, node: &Node) {
        let workspace_id = node.workspace_id.clone();
        let root_id = node.root_id.clone();
        let node_id = node.id.clone();
        let node_type = node.node_type.to_string();
        let event = match change {
            NodeChange::Created => DomainEvent::NodeCreated {
                workspace_id,
                root_id,
                node_id,
                node_type,
            },
            NodeChange::Updated => DomainEvent::NodeUpdated {
                workspace_id,
                root_id,
                node_id,
                node_type,
            },
            NodeChange::Deleted => DomainEvent::NodeDeleted {
                workspace_id,
                root_id,
                node_id,
                node_type,
            },
        };
        self.event_bus.publish(event);
    }
}

fn transaction_bytes(transaction: &TransactionRecord) -> Result<Vec<u8>> {
    let data = transaction.data.as_deref().ok_or_else(|| {
        ValidationError::InvalidInput(format!("transaction {} carries no data", transaction.id))
    })?;
    decode_bytes(data)
}
