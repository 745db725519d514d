use async_trait::async_trait;

use super::SyncConsumerType;
use crate::errors::Result;

/// Last applied version per `(user, stream)`.
#[async_trait]
pub trait SyncCursorRepositoryTrait: Send + Sync {
    /// `0` when the stream was never consumed.
    fn get_cursor(&self, user_id: &str, consumer: SyncConsumerType) -> Result<i64>;

    /// Stores `cursor` unless the stored value is already higher.
    async fn set_cursor(&self, user_id: &str, consumer: SyncConsumerType, cursor: i64) -> Result<()>;
}
