use serde::{Deserialize, Serialize};

/// Role of the local user inside the workspace as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceRole {
    None,
    Guest,
    Collaborator,
    Admin,
    Owner,
}

impl WorkspaceRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "guest" => Some(Self::Guest),
            "collaborator" => Some(Self::Collaborator),
            "admin" => Some(Self::Admin),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }
}

/// Who is acting, and where. Every workspace-scoped service is built with one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceContext {
    pub account_id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub role: WorkspaceRole,
}

impl WorkspaceContext {
    pub fn new(
        account_id: impl Into<String>,
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        role: WorkspaceRole,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            role,
        }
    }
}
