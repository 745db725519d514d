//! Database models for nodes and collaborations.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use tandem_core::errors::DatabaseError;
use tandem_core::nodes::{Collaboration, Node, NodeAttributes, NodeType};
use tandem_core::{Error, Result};

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::nodes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NodeDB {
    pub id: String,
    pub node_type: String,
    pub parent_id: Option<String>,
    pub root_id: String,
    pub workspace_id: String,
    pub attributes: String,
    pub state: Vec<u8>,
    pub local_revision: i64,
    pub server_revision: i64,
    pub created_at: String,
    pub created_by: String,
    pub updated_at: Option<String>,
    pub updated_by: Option<String>,
}

impl NodeDB {
    pub fn from_domain(node: &Node) -> Result<Self> {
        Ok(Self {
            id: node.id.clone(),
            node_type: node.node_type.as_str().to_string(),
            parent_id: node.parent_id.clone(),
            root_id: node.root_id.clone(),
            workspace_id: node.workspace_id.clone(),
            attributes: serde_json::to_string(&node.attributes)?,
            state: node.state.clone(),
            local_revision: node.local_revision,
            server_revision: node.server_revision,
            created_at: node.created_at.clone(),
            created_by: node.created_by.clone(),
            updated_at: node.updated_at.clone(),
            updated_by: node.updated_by.clone(),
        })
    }
}

impl TryFrom<NodeDB> for Node {
    type Error = Error;

    fn try_from(row: NodeDB) -> Result<Self> {
        let node_type = NodeType::parse(&row.node_type).ok_or_else(|| {
            DatabaseError::Internal(format!("Node {} has unknown type {}", row.id, row.node_type))
        })?;
        let attributes: NodeAttributes = serde_json::from_str(&row.attributes)?;
        Ok(Node {
            id: row.id,
            node_type,
            parent_id: row.parent_id,
            root_id: row.root_id,
            workspace_id: row.workspace_id,
            attributes,
            state: row.state,
            local_revision: row.local_revision,
            server_revision: row.server_revision,
            created_at: row.created_at,
            created_by: row.created_by,
            updated_at: row.updated_at,
            updated_by: row.updated_by,
        })
    }
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(primary_key(node_id, collaborator_id))]
#[diesel(table_name = crate::schema::collaborations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CollaborationDB {
    pub node_id: String,
    pub collaborator_id: String,
    pub role: String,
    pub revision: i64,
    pub created_at: String,
}

impl From<CollaborationDB> for Collaboration {
    fn from(row: CollaborationDB) -> Self {
        Collaboration {
            node_id: row.node_id,
            collaborator_id: row.collaborator_id,
            role: row.role,
            revision: row.revision,
            created_at: row.created_at,
        }
    }
}

impl From<Collaboration> for CollaborationDB {
    fn from(collaboration: Collaboration) -> Self {
        CollaborationDB {
            node_id: collaboration.node_id,
            collaborator_id: collaboration.collaborator_id,
            role: collaboration.role,
            revision: collaboration.revision,
            created_at: collaboration.created_at,
        }
    }
}
