use async_trait::async_trait;

use super::{Collaboration, Node, NodeAttributes};
use crate::errors::Result;
use crate::mutations::NewMutation;
use crate::transfers::{Download, Upload};

/// Everything a node create writes, committed as one unit.
#[derive(Debug, Clone)]
pub struct NodeCreateWrite {
    pub node: Node,
    /// `None` on the apply-only path.
    pub mutation: Option<NewMutation>,
    pub upload: Option<Upload>,
    pub download: Option<Download>,
}

/// Conditional update: applied only while the stored `local_revision` still
/// equals `expected_revision`.
#[derive(Debug, Clone)]
pub struct NodeUpdateWrite {
    pub node_id: String,
    pub expected_revision: i64,
    pub attributes: NodeAttributes,
    pub state: Vec<u8>,
    pub updated_at: String,
    pub updated_by: String,
    pub server_revision: Option<i64>,
    pub mutation: Option<NewMutation>,
}

#[derive(Debug, Clone)]
pub struct NodeDeleteWrite {
    pub node_id: String,
    pub mutation: Option<NewMutation>,
}

#[async_trait]
pub trait NodeRepositoryTrait: Send + Sync {
    fn get_node(&self, node_id: &str) -> Result<Option<Node>>;

    fn list_children(&self, parent_id: &str) -> Result<Vec<Node>>;

    fn get_collaboration(&self, node_id: &str, collaborator_id: &str) -> Result<Option<Collaboration>>;

    /// Fails with `MutationError::AlreadyExists` if the id is taken.
    async fn create_node(&self, write: NodeCreateWrite) -> Result<Node>;

    /// `Ok(None)` when the version condition failed.
    async fn update_node(&self, write: NodeUpdateWrite) -> Result<Option<Node>>;

    /// Removes the node and every row hanging off it. `Ok(false)` if the node
    /// was already gone (nothing, including the change record, is written).
    async fn delete_node(&self, write: NodeDeleteWrite) -> Result<bool>;

    /// Drops a whole tree after access to its root was revoked. No change records.
    async fn delete_nodes_by_root(&self, root_id: &str) -> Result<usize>;

    async fn upsert_collaboration(&self, collaboration: Collaboration) -> Result<()>;

    async fn delete_collaboration(&self, node_id: &str, collaborator_id: &str) -> Result<bool>;
}
