//! Database models for interactions and interaction events.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use tandem_core::interactions::{Interaction, InteractionAttributes, InteractionEvent};
use tandem_core::{Error, Result};

use crate::db::{enum_from_db, enum_to_db};

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
#[diesel(table_name = crate::schema::interactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct InteractionDB {
    pub node_id: String,
    pub collaborator_id: String,
    pub root_id: String,
    pub workspace_id: String,
    pub attributes: String,
    pub version: i64,
    pub server_revision: i64,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl InteractionDB {
    pub fn from_domain(interaction: &Interaction) -> Result<Self> {
        Ok(Self {
            node_id: interaction.node_id.clone(),
            collaborator_id: interaction.collaborator_id.clone(),
            root_id: interaction.root_id.clone(),
            workspace_id: interaction.workspace_id.clone(),
            attributes: serde_json::to_string(&interaction.attributes)?,
            version: interaction.version,
            server_revision: interaction.server_revision,
            created_at: interaction.created_at.clone(),
            updated_at: interaction.updated_at.clone(),
        })
    }
}

impl TryFrom<InteractionDB> for Interaction {
    type Error = Error;

    fn try_from(row: InteractionDB) -> Result<Self> {
        let attributes: InteractionAttributes = serde_json::from_str(&row.attributes)?;
        Ok(Interaction {
            node_id: row.node_id,
            collaborator_id: row.collaborator_id,
            root_id: row.root_id,
            workspace_id: row.workspace_id,
            attributes,
            version: row.version,
            server_revision: row.server_revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
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
#[diesel(primary_key(node_id, attribute))]
#[diesel(table_name = crate::schema::interaction_events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct InteractionEventDB {
    pub node_id: String,
    pub attribute: String,
    pub root_id: String,
    pub value: String,
    pub event_id: String,
    pub created_at: String,
    pub sent_at: Option<String>,
    pub sent_count: i32,
}

impl InteractionEventDB {
    pub fn from_domain(event: &InteractionEvent) -> Result<Self> {
        Ok(Self {
            node_id: event.node_id.clone(),
            attribute: enum_to_db(&event.attribute)?,
            root_id: event.root_id.clone(),
            value: event.value.clone(),
            event_id: event.event_id.clone(),
            created_at: event.created_at.clone(),
            sent_at: event.sent_at.clone(),
            sent_count: event.sent_count,
        })
    }
}

impl TryFrom<InteractionEventDB> for InteractionEvent {
    type Error = Error;

    fn try_from(row: InteractionEventDB) -> Result<Self> {
        Ok(InteractionEvent {
            attribute: enum_from_db(&row.attribute)?,
            node_id: row.node_id,
            root_id: row.root_id,
            value: row.value,
            event_id: row.event_id,
            created_at: row.created_at,
            sent_at: row.sent_at,
            sent_count: row.sent_count,
        })
    }
}
