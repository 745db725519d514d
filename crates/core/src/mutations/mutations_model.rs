//! Outbox change records.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Pushes that fail this many times are dropped from the outbox.
pub const MUTATION_MAX_RETRIES: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationType {
    #[serde(rename = "node.create")]
    NodeCreate,
    #[serde(rename = "node.update")]
    NodeUpdate,
    #[serde(rename = "node.delete")]
    NodeDelete,
}

impl MutationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeCreate => "node.create",
            Self::NodeUpdate => "node.update",
            Self::NodeDelete => "node.delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "node.create" => Some(Self::NodeCreate),
            "node.update" => Some(Self::NodeUpdate),
            "node.delete" => Some(Self::NodeDelete),
            _ => None,
        }
    }
}

/// Replayable payload. Document bytes travel base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MutationData {
    #[serde(rename = "node.create", rename_all = "camelCase")]
    NodeCreate {
        node_id: String,
        node_type: String,
        parent_id: Option<String>,
        root_id: String,
        state: String,
        created_at: String,
        created_by: String,
    },
    #[serde(rename = "node.update", rename_all = "camelCase")]
    NodeUpdate {
        node_id: String,
        root_id: String,
        update: String,
        updated_at: String,
        updated_by: String,
    },
    #[serde(rename = "node.delete", rename_all = "camelCase")]
    NodeDelete {
        node_id: String,
        root_id: String,
        deleted_at: String,
        deleted_by: String,
    },
}

impl MutationData {
    pub fn mutation_type(&self) -> MutationType {
        match self {
            Self::NodeCreate { .. } => MutationType::NodeCreate,
            Self::NodeUpdate { .. } => MutationType::NodeUpdate,
            Self::NodeDelete { .. } => MutationType::NodeDelete,
        }
    }

    pub fn node_id(&self) -> &str {
        match self {
            Self::NodeCreate { node_id, .. }
            | Self::NodeUpdate { node_id, .. }
            | Self::NodeDelete { node_id, .. } => node_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub id: String,
    pub workspace_id: String,
    pub node_id: String,
    pub data: MutationData,
    pub created_at: String,
    pub retries: i32,
}

/// Change record ready to be written alongside its entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMutation {
    pub id: String,
    pub workspace_id: String,
    pub data: MutationData,
    pub created_at: String,
}

impl NewMutation {
    pub fn new(workspace_id: impl Into<String>, data: MutationData, created_at: String) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            workspace_id: workspace_id.into(),
            data,
            created_at,
        }
    }

    pub fn node_id(&self) -> &str {
        self.data.node_id()
    }
}

pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_bytes(value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::unexpected(format!("Invalid base64 payload: {}", e)))
}

/// Outcome the server reports for one pushed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPushStatus {
    Accepted,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationPushResult {
    pub id: String,
    pub status: MutationPushStatus,
}
