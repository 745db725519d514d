use async_trait::async_trait;

use super::{Interaction, InteractionEvent, LocalInteractionWrite, ServerInteractionWrite};
use crate::errors::Result;

#[async_trait]
pub trait InteractionRepositoryTrait: Send + Sync {
    fn get_interaction(&self, node_id: &str, collaborator_id: &str) -> Result<Option<Interaction>>;

    fn list_pending_events(&self, node_id: &str) -> Result<Vec<InteractionEvent>>;

    /// Events never sent, or sent before `resend_before` without being
    /// acknowledged. Oldest first.
    fn list_events_to_send(&self, resend_before: &str, limit: i64) -> Result<Vec<InteractionEvent>>;

    /// `Ok(false)` when the version condition failed; nothing is written.
    async fn write_local_interaction(&self, write: LocalInteractionWrite) -> Result<bool>;

    /// `Ok(false)` when the version condition failed; nothing is written.
    async fn write_server_interaction(&self, write: ServerInteractionWrite) -> Result<bool>;

    /// Stamps the events with these ids. An event rewritten since it was
    /// listed carries a new id and stays unsent.
    async fn mark_events_sent(&self, event_ids: Vec<String>, sent_at: String) -> Result<()>;
}
