use std::sync::Arc;

use log::info;

use super::{Account, AccountRepositoryTrait};
use crate::errors::Result;
use crate::events::{DomainEvent, EventBus};
use crate::jobs::triggers::schedule_account_sync;
use crate::jobs::{JobInput, JobOptions, JobService};

/// Sign-in bookkeeping: recurring syncs on sign-in, token revocation on sign-out.
pub struct AccountService {
    repository: Arc<dyn AccountRepositoryTrait>,
    jobs: Arc<JobService>,
    event_bus: Arc<dyn EventBus>,
}

impl AccountService {
    pub fn new(
        repository: Arc<dyn AccountRepositoryTrait>,
        jobs: Arc<JobService>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            repository,
            jobs,
            event_bus,
        }
    }

    pub fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        self.repository.get_account(account_id)
    }

    pub async fn add_account(&self, account: Account) -> Result<Account> {
        let account = self.repository.insert_account(account).await?;
        schedule_account_sync(&self.jobs, &account.id, &account.server).await?;
        self.event_bus.publish(DomainEvent::AccountUpdated {
            account_id: account.id.clone(),
        });
        Ok(account)
    }

    /// Removes the account locally and queues revocation of its token.
    pub async fn sign_out(&self, account_id: &str) -> Result<bool> {
        let Some(deleted) = self.repository.delete_account(account_id).await? else {
            return Ok(false);
        };

        self.jobs
            .remove_schedule(&format!("account.sync.{}", account_id))
            .await?;
        self.enqueue_token_delete(&deleted.token, &deleted.server).await?;
        info!("[Accounts] Signed out {}", account_id);
        self.event_bus.publish(DomainEvent::AccountUpdated {
            account_id: account_id.to_string(),
        });
        Ok(true)
    }

    /// Re-queues revocation for tokens left over from an earlier run.
    pub async fn revoke_pending_tokens(&self) -> Result<usize> {
        let tokens = self.repository.list_deleted_tokens()?;
        for token in &tokens {
            self.enqueue_token_delete(&token.token, &token.server).await?;
        }
        Ok(tokens.len())
    }

    async fn enqueue_token_delete(&self, token: &str, server: &str) -> Result<()> {
        let key = format!("token.delete.{}", token);
        self.jobs
            .add_job(
                JobInput::TokenDelete {
                    token: token.to_string(),
                    server: server.to_string(),
                },
                JobOptions::deduplicate(key, false),
            )
            .await?;
        Ok(())
    }
}
