//! Replication records and socket messages shared by client and server.

use serde::{Deserialize, Serialize};

use crate::interactions::{InteractionAttribute, InteractionAttributes};

pub const TRANSACTIONS_BATCH_LIMIT: usize = 20;
pub const INTERACTIONS_BATCH_LIMIT: usize = 20;
pub const COLLABORATIONS_BATCH_LIMIT: usize = 50;
pub const DELETED_COLLABORATIONS_BATCH_LIMIT: usize = 50;

/// Replication streams a device can consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncConsumerType {
    Transactions,
    Collaborations,
    DeletedCollaborations,
    Interactions,
}

impl SyncConsumerType {
    pub const ALL: [SyncConsumerType; 4] = [
        SyncConsumerType::Transactions,
        SyncConsumerType::Collaborations,
        SyncConsumerType::DeletedCollaborations,
        SyncConsumerType::Interactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::Collaborations => "collaborations",
            Self::DeletedCollaborations => "deleted_collaborations",
            Self::Interactions => "interactions",
        }
    }

    pub fn batch_limit(&self) -> usize {
        match self {
            Self::Transactions => TRANSACTIONS_BATCH_LIMIT,
            Self::Interactions => INTERACTIONS_BATCH_LIMIT,
            Self::Collaborations => COLLABORATIONS_BATCH_LIMIT,
            Self::DeletedCollaborations => DELETED_COLLABORATIONS_BATCH_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOperation {
    Create,
    Update,
    Delete,
}

/// One entry of the server's node transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    pub version: i64,
    pub operation: TransactionOperation,
    pub node_id: String,
    pub node_type: String,
    pub parent_id: Option<String>,
    pub root_id: String,
    pub workspace_id: String,
    /// Base64 full state for creates, base64 delta for updates, absent for deletes.
    pub data: Option<String>,
    pub created_at: String,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationRecord {
    pub node_id: String,
    pub collaborator_id: String,
    pub workspace_id: String,
    pub role: String,
    pub version: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedCollaborationRecord {
    pub node_id: String,
    pub collaborator_id: String,
    pub workspace_id: String,
    pub version: i64,
    pub deleted_at: String,
}

/// Server-authoritative snapshot of one user's interaction with a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub node_id: String,
    pub root_id: String,
    pub collaborator_id: String,
    pub workspace_id: String,
    pub attributes: InteractionAttributes,
    pub version: i64,
    pub created_at: String,
    pub updated_at: Option<String>,
}

/// Pending attribute change sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEventPayload {
    pub node_id: String,
    pub root_id: String,
    pub attribute: InteractionAttribute,
    pub value: String,
    pub event_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    InitSyncConsumer {
        user_id: String,
        consumer_type: SyncConsumerType,
        cursor: i64,
    },
    #[serde(rename_all = "camelCase")]
    SyncInteractions {
        user_id: String,
        workspace_id: String,
        events: Vec<InteractionEventPayload>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    TransactionsBatch {
        user_id: String,
        transactions: Vec<TransactionRecord>,
    },
    #[serde(rename_all = "camelCase")]
    CollaborationsBatch {
        user_id: String,
        collaborations: Vec<CollaborationRecord>,
    },
    #[serde(rename_all = "camelCase")]
    DeletedCollaborationsBatch {
        user_id: String,
        deleted_collaborations: Vec<DeletedCollaborationRecord>,
    },
    #[serde(rename_all = "camelCase")]
    InteractionsBatch {
        user_id: String,
        interactions: Vec<InteractionRecord>,
    },
}

impl ServerMessage {
    pub fn user_id(&self) -> &str {
        match self {
            Self::TransactionsBatch { user_id, .. }
            | Self::CollaborationsBatch { user_id, .. }
            | Self::DeletedCollaborationsBatch { user_id, .. }
            | Self::InteractionsBatch { user_id, .. } => user_id,
        }
    }

    pub fn consumer_type(&self) -> SyncConsumerType {
        match self {
            Self::TransactionsBatch { .. } => SyncConsumerType::Transactions,
            Self::CollaborationsBatch { .. } => SyncConsumerType::Collaborations,
            Self::DeletedCollaborationsBatch { .. } => SyncConsumerType::DeletedCollaborations,
            Self::InteractionsBatch { .. } => SyncConsumerType::Interactions,
        }
    }

    /// Highest version carried by the batch; the client's next cursor.
    pub fn max_version(&self) -> Option<i64> {
        match self {
            Self::TransactionsBatch { transactions, .. } => {
                transactions.iter().map(|t| t.version).max()
            }
            Self::CollaborationsBatch { collaborations, .. } => {
                collaborations.iter().map(|c| c.version).max()
            }
            Self::DeletedCollaborationsBatch {
                deleted_collaborations,
                ..
            } => deleted_collaborations.iter().map(|c| c.version).max(),
            Self::InteractionsBatch { interactions, .. } => {
                interactions.iter().map(|i| i.version).max()
            }
        }
    }
}
