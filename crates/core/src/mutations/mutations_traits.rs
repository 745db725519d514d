use async_trait::async_trait;

use super::Mutation;
use crate::errors::Result;

/// Read and acknowledge side of the outbox. Rows are only ever appended by
/// the node repository, inside the entity's own transaction.
#[async_trait]
pub trait MutationRepositoryTrait: Send + Sync {
    /// Oldest first.
    fn list_pending_mutations(&self, workspace_id: &str, limit: i64) -> Result<Vec<Mutation>>;

    fn count_mutations_for_node(&self, node_id: &str) -> Result<i64>;

    async fn delete_mutations(&self, ids: Vec<String>) -> Result<usize>;

    /// Bumps `retries` on each row and drops rows that reached `max_retries`.
    /// Returns the number of rows dropped.
    async fn mark_mutations_failed(&self, ids: Vec<String>, max_retries: i32) -> Result<usize>;
}
