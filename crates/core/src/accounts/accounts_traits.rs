use async_trait::async_trait;

use super::{Account, AccountProfile, DeletedToken, Server};
use crate::errors::Result;

#[async_trait]
pub trait AccountRepositoryTrait: Send + Sync {
    fn get_account(&self, account_id: &str) -> Result<Option<Account>>;

    fn list_accounts(&self) -> Result<Vec<Account>>;

    async fn insert_account(&self, account: Account) -> Result<Account>;

    async fn update_account_profile(
        &self,
        account_id: &str,
        profile: AccountProfile,
        synced_at: String,
    ) -> Result<Option<Account>>;

    /// Removes the account and parks its token for revocation, atomically.
    async fn delete_account(&self, account_id: &str) -> Result<Option<DeletedToken>>;

    fn get_server(&self, domain: &str) -> Result<Option<Server>>;

    async fn upsert_server(&self, server: Server) -> Result<Server>;

    fn list_deleted_tokens(&self) -> Result<Vec<DeletedToken>>;

    async fn delete_deleted_token(&self, token: &str) -> Result<bool>;
}
