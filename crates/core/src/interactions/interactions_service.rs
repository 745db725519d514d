use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};

use super::merge::{merge_attribute, reconcile};
use super::{
    Interaction, InteractionAttribute, InteractionRepositoryTrait, LocalInteractionWrite,
    ServerInteractionWrite,
};
use crate::context::WorkspaceContext;
use crate::errors::{Error, MutationError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::interactions::InteractionEvent;
use crate::nodes::NodeRepositoryTrait;
use crate::sync::{ClientMessage, InteractionEventPayload, InteractionRecord};
use crate::utils::time::{now_db_timestamp, to_db_timestamp};

pub const INTERACTION_UPDATE_MAX_ATTEMPTS: usize = 10;

/// Sent but unacknowledged events become eligible again after this long.
const INTERACTION_RESEND_AFTER_SECS: i64 = 60;

pub struct InteractionService {
    context: WorkspaceContext,
    repository: Arc<dyn InteractionRepositoryTrait>,
    nodes: Arc<dyn NodeRepositoryTrait>,
    event_bus: Arc<dyn EventBus>,
}

impl InteractionService {
    pub fn new(
        context: WorkspaceContext,
        repository: Arc<dyn InteractionRepositoryTrait>,
        nodes: Arc<dyn NodeRepositoryTrait>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            context,
            repository,
            nodes,
            event_bus,
        }
    }

    pub fn get_interaction(&self, node_id: &str) -> Result<Option<Interaction>> {
        self.repository
            .get_interaction(node_id, &self.context.user_id)
    }

    /// Merges one attribute into the local user's interaction and records it
    /// as pending. A value that would regress the attribute changes nothing.
    pub async fn set_interaction(
        &self,
        node_id: &str,
        attribute: InteractionAttribute,
        value: String,
    ) -> Result<Interaction> {
        let node = self
            .nodes
            .get_node(node_id)?
            .ok_or_else(|| Error::not_found(format!("Node {}", node_id)))?;

        for attempt in 1..=INTERACTION_UPDATE_MAX_ATTEMPTS {
            let existing = self
                .repository
                .get_interaction(node_id, &self.context.user_id)?;

            let mut attributes = existing
                .as_ref()
                .map(|i| i.attributes.clone())
                .unwrap_or_default();
            if !merge_attribute(&mut attributes, attribute, &value) {
                if let Some(current) = existing {
                    debug!(
                        "[Interactions] {} of {} is already at or past {}",
                        attribute.as_str(),
                        node_id,
                        value
                    );
                    return Ok(current);
                }
            }

            let now = now_db_timestamp();
            let interaction = Interaction {
                node_id: node.id.clone(),
                collaborator_id: self.context.user_id.clone(),
                root_id: node.root_id.clone(),
                workspace_id: self.context.workspace_id.clone(),
                attributes,
                version: existing.as_ref().map_or(1, |i| i.version + 1),
                server_revision: existing.as_ref().map_or(0, |i| i.server_revision),
                created_at: existing
                    .as_ref()
                    .map_or_else(|| now.clone(), |i| i.created_at.clone()),
                updated_at: existing.as_ref().map(|_| now.clone()),
            };
            let event = InteractionEvent {
                node_id: node.id.clone(),
                root_id: node.root_id.clone(),
                attribute,
                value: value.clone(),
                event_id: uuid::Uuid::now_v7().to_string(),
                created_at: now,
                sent_at: None,
                sent_count: 0,
            };

            let written = self
                .repository
                .write_local_interaction(LocalInteractionWrite {
                    interaction: interaction.clone(),
                    expected_version: existing.as_ref().map(|i| i.version),
                    event,
                })
                .await?;
            if written {
                self.publish(&interaction);
                return Ok(interaction);
            }
            debug!(
                "[Interactions] Version conflict on {} (attempt {}/{})",
                node_id, attempt, INTERACTION_UPDATE_MAX_ATTEMPTS
            );
        }

        Err(MutationError::ConflictRetriesExhausted {
            entity: "interaction",
            id: node_id.to_string(),
            attempts: INTERACTION_UPDATE_MAX_ATTEMPTS,
        }
        .into())
    }

    /// Sets both `firstSeenAt` (if unset) and `lastSeenAt` to now.
    pub async fn mark_seen(&self, node_id: &str) -> Result<Interaction> {
        let now = now_db_timestamp();
        self.set_interaction(node_id, InteractionAttribute::FirstSeenAt, now.clone())
            .await?;
        self.set_interaction(node_id, InteractionAttribute::LastSeenAt, now)
            .await
    }

    pub async fn mark_opened(&self, node_id: &str) -> Result<Interaction> {
        let now = now_db_timestamp();
        self.set_interaction(node_id, InteractionAttribute::FirstOpenedAt, now.clone())
            .await?;
        self.set_interaction(node_id, InteractionAttribute::LastOpenedAt, now)
            .await
    }

    /// Applies a server snapshot. Another user's state is taken as is; the
    /// local user's state is reconciled with still-pending events. Returns
    /// whether anything was written.
    pub async fn apply_server_interaction(&self, record: &InteractionRecord) -> Result<bool> {
        let is_local_user = record.collaborator_id == self.context.user_id;

        for attempt in 1..=INTERACTION_UPDATE_MAX_ATTEMPTS {
            let existing = self
                .repository
                .get_interaction(&record.node_id, &record.collaborator_id)?;
            if existing
                .as_ref()
                .is_some_and(|i| i.server_revision >= record.version)
            {
                debug!(
                    "[Interactions] Snapshot {} for {} already applied",
                    record.version, record.node_id
                );
                return Ok(false);
            }

            let (attributes, pruned_events) = if is_local_user {
                let pending = self.repository.list_pending_events(&record.node_id)?;
                let outcome = reconcile(&record.attributes, pending);
                if !outcome.pruned.is_empty() {
                    debug!(
                        "[Interactions] Pruning {} obsolete events for {}",
                        outcome.pruned.len(),
                        record.node_id
                    );
                }
                (
                    outcome.attributes,
                    outcome.pruned.into_iter().map(|e| e.attribute).collect(),
                )
            } else {
                (record.attributes.clone(), Vec::new())
            };

            let interaction = Interaction {
                node_id: record.node_id.clone(),
                collaborator_id: record.collaborator_id.clone(),
                root_id: record.root_id.clone(),
                workspace_id: record.workspace_id.clone(),
                attributes,
                version: existing.as_ref().map_or(1, |i| i.version + 1),
                server_revision: record.version,
                created_at: record.created_at.clone(),
                updated_at: record.updated_at.clone(),
            };

            let written = self
                .repository
                .write_server_interaction(ServerInteractionWrite {
                    interaction: interaction.clone(),
                    expected_version: existing.as_ref().map(|i| i.version),
                    pruned_events,
                })
                .await?;
            if written {
                self.publish(&interaction);
                return Ok(true);
            }
            debug!(
                "[Interactions] Version conflict applying snapshot for {} (attempt {}/{})",
                record.node_id, attempt, INTERACTION_UPDATE_MAX_ATTEMPTS
            );
        }

        warn!(
            "[Interactions] Giving up on snapshot {} for {}",
            record.version, record.node_id
        );
        Err(MutationError::ConflictRetriesExhausted {
            entity: "interaction",
            id: record.node_id.clone(),
            attempts: INTERACTION_UPDATE_MAX_ATTEMPTS,
        }
        .into())
    }

    /// Builds the next `sync_interactions` message and marks its events sent.
    pub async fn pending_sync_message(&self, limit: i64) -> Result<Option<ClientMessage>> {
        let resend_before =
            to_db_timestamp(&(Utc::now() - chrono::Duration::seconds(INTERACTION_RESEND_AFTER_SECS)));
        let events = self.repository.list_events_to_send(&resend_before, limit)?;
        if events.is_empty() {
            return Ok(None);
        }

        let sent: Vec<String> = events.iter().map(|e| e.event_id.clone()).collect();
        self.repository
            .mark_events_sent(sent, now_db_timestamp())
            .await?;

        Ok(Some(ClientMessage::SyncInteractions {
            user_id: self.context.user_id.clone(),
            workspace_id: self.context.workspace_id.clone(),
            events: events
                .into_iter()
                .map(|e| InteractionEventPayload {
                    node_id: e.node_id,
                    root_id: e.root_id,
                    attribute: e.attribute,
                    value: e.value,
                    event_id: e.event_id,
                    created_at: e.created_at,
                })
                .collect(),
        }))
    }

    fn publish(&self, interaction: &Interaction) {
        self.event_bus.publish(DomainEvent::InteractionUpdated {
            workspace_id: interaction.workspace_id.clone(),
            root_id: interaction.root_id.clone(),
            node_id: interaction.node_id.clone(),
            collaborator_id: interaction.collaborator_id.clone(),
        });
    }
}
