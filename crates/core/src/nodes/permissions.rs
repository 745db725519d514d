//! Role resolution and per-type authorization rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{WorkspaceContext, WorkspaceRole};

use super::{Node, NodeAttributes, NodeType};

pub const COLLABORATORS_ATTRIBUTE: &str = "collaborators";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Viewer,
    Collaborator,
    Editor,
    Admin,
}

impl NodeRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "viewer" => Some(Self::Viewer),
            "collaborator" => Some(Self::Collaborator),
            "editor" => Some(Self::Editor),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

fn role_in(attributes: &NodeAttributes, user_id: &str) -> Option<NodeRole> {
    attributes
        .get(COLLABORATORS_ATTRIBUTE)
        .and_then(Value::as_object)
        .and_then(|c| c.get(user_id))
        .and_then(Value::as_str)
        .and_then(NodeRole::parse)
}

/// Effective role of `user_id` over a root-first ancestor chain. A grant on a
/// nearer ancestor replaces one inherited from further up.
pub fn extract_node_role(chain: &[Node], user_id: &str) -> Option<NodeRole> {
    chain
        .iter()
        .fold(None, |role, node| role_in(&node.attributes, user_id).or(role))
}

/// Everything the per-type rules look at.
pub struct PermissionCheck<'a> {
    pub context: &'a WorkspaceContext,
    pub role: Option<NodeRole>,
}

impl PermissionCheck<'_> {
    fn at_least(&self, required: NodeRole) -> bool {
        self.context.role >= WorkspaceRole::Guest && self.role.is_some_and(|r| r >= required)
    }
}

/// `chain` is the would-be parent's ancestry (empty for a root).
pub fn can_create(
    context: &WorkspaceContext,
    node_type: NodeType,
    attributes: &NodeAttributes,
    chain: &[Node],
) -> bool {
    let check = PermissionCheck {
        context,
        role: extract_node_role(chain, &context.user_id),
    };
    match node_type {
        NodeType::Space => {
            context.role >= WorkspaceRole::Collaborator
                && role_in(attributes, &context.user_id) == Some(NodeRole::Admin)
        }
        NodeType::Page | NodeType::Folder | NodeType::Channel | NodeType::Database => {
            check.at_least(NodeRole::Editor)
        }
        NodeType::Record | NodeType::Message | NodeType::File => {
            check.at_least(NodeRole::Collaborator)
        }
    }
}

/// `chain` ends with the node being updated.
pub fn can_update(context: &WorkspaceContext, node: &Node, chain: &[Node]) -> bool {
    let check = PermissionCheck {
        context,
        role: extract_node_role(chain, &context.user_id),
    };
    match node.node_type {
        NodeType::Space => check.at_least(NodeRole::Admin),
        NodeType::Page | NodeType::Folder | NodeType::Channel | NodeType::Database => {
            check.at_least(NodeRole::Editor)
        }
        NodeType::Record | NodeType::Message | NodeType::File => {
            (node.created_by == context.user_id && check.at_least(NodeRole::Collaborator))
                || check.at_least(NodeRole::Editor)
        }
    }
}

pub fn can_delete(context: &WorkspaceContext, node: &Node, chain: &[Node]) -> bool {
    let check = PermissionCheck {
        context,
        role: extract_node_role(chain, &context.user_id),
    };
    match node.node_type {
        NodeType::Space => check.at_least(NodeRole::Admin),
        NodeType::Page | NodeType::Folder | NodeType::Channel | NodeType::Database => {
            check.at_least(NodeRole::Editor)
        }
        NodeType::Record | NodeType::Message | NodeType::File => {
            (node.created_by == context.user_id && check.at_least(NodeRole::Collaborator))
                || check.at_least(NodeRole::Admin)
        }
    }
}
