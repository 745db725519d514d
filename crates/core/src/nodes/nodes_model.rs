//! Node domain models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type NodeAttributes = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Space,
    Page,
    Folder,
    Channel,
    Database,
    Record,
    Message,
    File,
}

impl NodeType {
    pub const ALL: [NodeType; 8] = [
        NodeType::Space,
        NodeType::Page,
        NodeType::Folder,
        NodeType::Channel,
        NodeType::Database,
        NodeType::Record,
        NodeType::Message,
        NodeType::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Space => "space",
            NodeType::Page => "page",
            NodeType::Folder => "folder",
            NodeType::Channel => "channel",
            NodeType::Database => "database",
            NodeType::Record => "record",
            NodeType::Message => "message",
            NodeType::File => "file",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Only spaces are roots; everything else hangs off a parent.
    pub fn requires_parent(&self) -> bool {
        !matches!(self, NodeType::Space)
    }

    /// Whether a node of this type may be created under `parent`.
    pub fn accepts_parent(&self, parent: NodeType) -> bool {
        match self {
            NodeType::Space => false,
            NodeType::Page | NodeType::Folder | NodeType::Channel | NodeType::Database => {
                matches!(parent, NodeType::Space | NodeType::Folder | NodeType::Page)
            }
            NodeType::Record => parent == NodeType::Database,
            NodeType::Message => matches!(
                parent,
                NodeType::Channel | NodeType::Page | NodeType::Record | NodeType::Message
            ),
            NodeType::File => parent != NodeType::File,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node as stored in the local replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub node_type: NodeType,
    pub parent_id: Option<String>,
    pub root_id: String,
    pub workspace_id: String,
    pub attributes: NodeAttributes,
    #[serde(skip)]
    pub state: Vec<u8>,
    /// Local version token, bumped on every write to the row.
    pub local_revision: i64,
    /// Last revision acknowledged by the server; 0 until the server has the node.
    pub server_revision: i64,
    pub created_at: String,
    pub created_by: String,
    pub updated_at: Option<String>,
    pub updated_by: Option<String>,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// Transfer row created in the same transaction as a file node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialTransfer {
    Upload,
    Download { path: String },
}

#[derive(Debug, Clone)]
pub struct CreateNodeInput {
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub attributes: NodeAttributes,
    pub transfer: Option<InitialTransfer>,
}

impl CreateNodeInput {
    pub fn new(parent_id: Option<String>, attributes: NodeAttributes) -> Self {
        Self {
            id: None,
            parent_id,
            attributes,
            transfer: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_transfer(mut self, transfer: InitialTransfer) -> Self {
        self.transfer = Some(transfer);
        self
    }
}

/// Local grant of a role on a root node, as pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaboration {
    pub node_id: String,
    pub collaborator_id: String,
    pub role: String,
    pub revision: i64,
    pub created_at: String,
}
