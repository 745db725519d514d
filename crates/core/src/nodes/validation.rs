//! Attribute schemas per node type.

use serde_json::Value;

use crate::errors::{Result, ValidationError};

use super::permissions::{NodeRole, COLLABORATORS_ATTRIBUTE};
use super::{NodeAttributes, NodeType};

const MAX_NAME_LENGTH: usize = 256;

fn invalid(node_type: NodeType, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidAttributes {
        node_type: node_type.to_string(),
        message: message.into(),
    }
}

fn require_name(node_type: NodeType, attrs: &NodeAttributes) -> Result<()> {
    match attrs.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() && name.chars().count() <= MAX_NAME_LENGTH => Ok(()),
        Some(_) => Err(invalid(node_type, "name must be 1 to 256 characters").into()),
        None => Err(invalid(node_type, "name is required").into()),
    }
}

fn optional_string(node_type: NodeType, attrs: &NodeAttributes, key: &str) -> Result<()> {
    match attrs.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(invalid(node_type, format!("{} must be a string", key)).into()),
    }
}

fn validate_collaborators(node_type: NodeType, attrs: &NodeAttributes, required: bool) -> Result<()> {
    match attrs.get(COLLABORATORS_ATTRIBUTE) {
        None if !required => Ok(()),
        None => Err(invalid(node_type, "collaborators are required").into()),
        Some(Value::Object(entries)) => {
            if required && entries.is_empty() {
                return Err(invalid(node_type, "at least one collaborator is required").into());
            }
            for (user, role) in entries {
                if role.as_str().and_then(NodeRole::parse).is_none() {
                    return Err(invalid(
                        node_type,
                        format!("collaborator {} has an unknown role", user),
                    )
                    .into());
                }
            }
            Ok(())
        }
        Some(_) => Err(invalid(node_type, "collaborators must be an object").into()),
    }
}

/// Checks `attrs` against the schema for `node_type`. The `type` attribute
/// must agree with the node's type.
pub fn validate_attributes(node_type: NodeType, attrs: &NodeAttributes) -> Result<()> {
    match attrs.get("type").and_then(Value::as_str) {
        Some(value) if value == node_type.as_str() => {}
        Some(value) => {
            return Err(invalid(node_type, format!("type attribute is '{}'", value)).into())
        }
        None => return Err(invalid(node_type, "type attribute is required").into()),
    }

    match node_type {
        NodeType::Space => {
            require_name(node_type, attrs)?;
            optional_string(node_type, attrs, "description")?;
            validate_collaborators(node_type, attrs, true)
        }
        NodeType::Page | NodeType::Folder | NodeType::Channel | NodeType::Database => {
            require_name(node_type, attrs)?;
            optional_string(node_type, attrs, "icon")?;
            validate_collaborators(node_type, attrs, false)
        }
        NodeType::Record => {
            optional_string(node_type, attrs, "name")?;
            match attrs.get("fields") {
                None | Some(Value::Object(_)) => Ok(()),
                Some(_) => Err(invalid(node_type, "fields must be an object").into()),
            }
        }
        NodeType::Message => match attrs.get("content").and_then(Value::as_str) {
            Some(content) if !content.is_empty() => Ok(()),
            _ => Err(invalid(node_type, "content is required").into()),
        },
        NodeType::File => {
            require_name(node_type, attrs)?;
            for key in ["mimeType", "extension"] {
                if attrs.get(key).and_then(Value::as_str).is_none() {
                    return Err(invalid(node_type, format!("{} is required", key)).into());
                }
            }
            match attrs.get("size").and_then(Value::as_u64) {
                Some(_) => Ok(()),
                None => Err(invalid(node_type, "size must be a non-negative integer").into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use serde_json::json;

    fn check(node_type: NodeType, value: Value) -> Result<()> {
        validate_attributes(node_type, value.as_object().expect("object"))
    }

    #[test]
    fn accepts_well_formed_nodes() {
        check(
            NodeType::Space,
            json!({ "type": "space", "name": "Team", "collaborators": { "u1": "admin" } }),
        )
        .expect("space");
        check(NodeType::Page, json!({ "type": "page", "name": "Notes" })).expect("page");
        check(NodeType::Record, json!({ "type": "record", "fields": {} })).expect("record");
        check(NodeType::Message, json!({ "type": "message", "content": "hi" })).expect("message");
        check(
            NodeType::File,
            json!({ "type": "file", "name": "a.png", "mimeType": "image/png", "extension": ".png", "size": 10 }),
        )
        .expect("file");
    }

    #[test]
    fn rejects_type_mismatch_and_missing_fields() {
        for (node_type, value) in [
            (NodeType::Page, json!({ "type": "folder", "name": "x" })),
            (NodeType::Page, json!({ "name": "x" })),
            (NodeType::Folder, json!({ "type": "folder", "name": "  " })),
            (NodeType::Space, json!({ "type": "space", "name": "x", "collaborators": {} })),
            (NodeType::Space, json!({ "type": "space", "name": "x", "collaborators": { "u1": "owner" } })),
            (NodeType::Message, json!({ "type": "message" })),
            (NodeType::File, json!({ "type": "file", "name": "a", "mimeType": "x", "extension": ".a", "size": -1 })),
        ] {
            let err = check(node_type, value).expect_err("must reject");
            assert!(matches!(
                err,
                Error::Validation(ValidationError::InvalidAttributes { .. })
            ));
        }
    }
}
