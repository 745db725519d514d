use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InteractionAttribute {
    FirstSeenAt,
    LastSeenAt,
    FirstOpenedAt,
    LastOpenedAt,
}

impl InteractionAttribute {
    pub const ALL: [InteractionAttribute; 4] = [
        InteractionAttribute::FirstSeenAt,
        InteractionAttribute::LastSeenAt,
        InteractionAttribute::FirstOpenedAt,
        InteractionAttribute::LastOpenedAt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstSeenAt => "firstSeenAt",
            Self::LastSeenAt => "lastSeenAt",
            Self::FirstOpenedAt => "firstOpenedAt",
            Self::LastOpenedAt => "lastOpenedAt",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == value)
    }

    /// `first*` attributes only ever move backwards in time, `last*` forwards.
    pub fn keeps_earliest(&self) -> bool {
        matches!(self, Self::FirstSeenAt | Self::FirstOpenedAt)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_opened_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_opened_at: Option<String>,
}

impl InteractionAttributes {
    pub fn get(&self, attribute: InteractionAttribute) -> Option<&str> {
        match attribute {
            InteractionAttribute::FirstSeenAt => self.first_seen_at.as_deref(),
            InteractionAttribute::LastSeenAt => self.last_seen_at.as_deref(),
            InteractionAttribute::FirstOpenedAt => self.first_opened_at.as_deref(),
            InteractionAttribute::LastOpenedAt => self.last_opened_at.as_deref(),
        }
    }

    pub fn set(&mut self, attribute: InteractionAttribute, value: String) {
        let slot = match attribute {
            InteractionAttribute::FirstSeenAt => &mut self.first_seen_at,
            InteractionAttribute::LastSeenAt => &mut self.last_seen_at,
            InteractionAttribute::FirstOpenedAt => &mut self.first_opened_at,
            InteractionAttribute::LastOpenedAt => &mut self.last_opened_at,
        };
        *slot = Some(value);
    }
}

/// One user's interaction state with one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub node_id: String,
    pub collaborator_id: String,
    pub root_id: String,
    pub workspace_id: String,
    pub attributes: InteractionAttributes,
    /// Local version token.
    pub version: i64,
    pub server_revision: i64,
    pub created_at: String,
    pub updated_at: Option<String>,
}

/// Pending local change, keyed by `(node_id, attribute)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub node_id: String,
    pub root_id: String,
    pub attribute: InteractionAttribute,
    pub value: String,
    pub event_id: String,
    pub created_at: String,
    pub sent_at: Option<String>,
    pub sent_count: i32,
}

/// Conditional write of the local user's interaction plus its pending event.
#[derive(Debug, Clone)]
pub struct LocalInteractionWrite {
    pub interaction: Interaction,
    /// `None` means the row must not exist yet.
    pub expected_version: Option<i64>,
    pub event: InteractionEvent,
}

/// Conditional write of a server snapshot.
#[derive(Debug, Clone)]
pub struct ServerInteractionWrite {
    pub interaction: Interaction,
    pub expected_version: Option<i64>,
    /// Pending events acknowledged or made obsolete by the snapshot.
    pub pruned_events: Vec<InteractionAttribute>,
}
