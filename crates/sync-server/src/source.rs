//! Where consumers read replication records from, and where client
//! interaction events are written to.

use async_trait::async_trait;

use tandem_core::sync::{
    CollaborationRecord, DeletedCollaborationRecord, InteractionEventPayload, InteractionRecord,
    ServerMessage, SyncConsumerType, TransactionRecord,
};
use tandem_core::Result;

/// A workspace user served over a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncUser {
    pub user_id: String,
    pub workspace_id: String,
}

impl SyncUser {
    pub fn new(user_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
        }
    }
}

/// Versioned replication records. Every query returns records with a version
/// strictly greater than `cursor` that `user` may see, ascending by version,
/// at most `limit` of them.
#[async_trait]
pub trait SyncRecordSource: Send + Sync {
    async fn transactions_after(
        &self,
        user: &SyncUser,
        cursor: i64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>>;

    async fn collaborations_after(
        &self,
        user: &SyncUser,
        cursor: i64,
        limit: usize,
    ) -> Result<Vec<CollaborationRecord>>;

    async fn deleted_collaborations_after(
        &self,
        user: &SyncUser,
        cursor: i64,
        limit: usize,
    ) -> Result<Vec<DeletedCollaborationRecord>>;

    async fn interactions_after(
        &self,
        user: &SyncUser,
        cursor: i64,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>>;
}

#[async_trait]
pub trait InteractionWriter: Send + Sync {
    /// Merges client events into the stored interactions of `user`. Returns
    /// the interactions that changed.
    async fn write_events(
        &self,
        user: &SyncUser,
        events: Vec<InteractionEventPayload>,
    ) -> Result<Vec<InteractionRecord>>;
}

/// Next batch of `consumer` after `cursor`, or `None` when there is nothing
/// new.
pub async fn fetch_batch(
    source: &dyn SyncRecordSource,
    user: &SyncUser,
    consumer: SyncConsumerType,
    cursor: i64,
) -> Result<Option<ServerMessage>> {
    let limit = consumer.batch_limit();
    let user_id = user.user_id.clone();
    let message = match consumer {
        SyncConsumerType::Transactions => {
            let transactions = source.transactions_after(user, cursor, limit).await?;
            (!transactions.is_empty()).then_some(ServerMessage::TransactionsBatch {
                user_id,
                transactions,
            })
        }
        SyncConsumerType::Collaborations => {
            let collaborations = source.collaborations_after(user, cursor, limit).await?;
            (!collaborations.is_empty()).then_some(ServerMessage::CollaborationsBatch {
                user_id,
                collaborations,
            })
        }
        SyncConsumerType::DeletedCollaborations => {
            let deleted_collaborations = source
                .deleted_collaborations_after(user, cursor, limit)
                .await?;
            (!deleted_collaborations.is_empty()).then_some(
                ServerMessage::DeletedCollaborationsBatch {
                    user_id,
                    deleted_collaborations,
                },
            )
        }
        SyncConsumerType::Interactions => {
            let interactions = source.interactions_after(user, cursor, limit).await?;
            (!interactions.is_empty()).then_some(ServerMessage::InteractionsBatch {
                user_id,
                interactions,
            })
        }
    };
    Ok(message)
}
