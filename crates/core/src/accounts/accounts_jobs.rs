//! Handlers for `account.sync`, `server.sync` and `token.delete`.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use super::{AccountRepositoryTrait, Server};
use crate::errors::{Error, Result};
use crate::events::{DomainEvent, EventBus};
use crate::jobs::{unexpected_input, Job, JobHandler, JobInput, JobOutput, UNREACHABLE_RETRY_DELAY};
use crate::remote::RemoteApi;
use crate::utils::time::now_db_timestamp;

pub struct AccountSyncJobHandler {
    accounts: Arc<dyn AccountRepositoryTrait>,
    remote: Arc<dyn RemoteApi>,
    event_bus: Arc<dyn EventBus>,
}

impl AccountSyncJobHandler {
    pub fn new(
        accounts: Arc<dyn AccountRepositoryTrait>,
        remote: Arc<dyn RemoteApi>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            accounts,
            remote,
            event_bus,
        }
    }
}

#[async_trait]
impl JobHandler for AccountSyncJobHandler {
    async fn handle(&self, job: &Job) -> Result<JobOutput> {
        let JobInput::AccountSync { account_id } = &job.input else {
            return Err(unexpected_input("account.sync", job));
        };

        let Some(account) = self.accounts.get_account(account_id)? else {
            debug!("[Accounts] Account {} is gone, skipping sync", account_id);
            return Ok(JobOutput::Success);
        };
        if !self.remote.is_reachable(&account.server).await {
            return Ok(JobOutput::Retry {
                delay: UNREACHABLE_RETRY_DELAY,
            });
        }

        let profile = match self.remote.sync_account(&account).await {
            Ok(profile) => profile,
            Err(Error::Remote(err)) if !err.retryable => {
                // Schedule runs again later; nothing to gain from retrying now.
                warn!(
                    "[Accounts] Server rejected sync for {}: {}",
                    account.id, err
                );
                return Ok(JobOutput::Success);
            }
            Err(err) => return Err(err),
        };

        let changed = profile.name != account.name
            || profile.email != account.email
            || profile.avatar != account.avatar;
        self.accounts
            .update_account_profile(&account.id, profile, now_db_timestamp())
            .await?;
        if changed {
            info!("[Accounts] Profile of {} updated", account.id);
            self.event_bus.publish(DomainEvent::AccountUpdated {
                account_id: account.id,
            });
        }
        Ok(JobOutput::Success)
    }
}

/// Refreshes a server's config and tracks whether it answers.
pub struct ServerSyncJobHandler {
    accounts: Arc<dyn AccountRepositoryTrait>,
    remote: Arc<dyn RemoteApi>,
    event_bus: Arc<dyn EventBus>,
}

impl ServerSyncJobHandler {
    pub fn new(
        accounts: Arc<dyn AccountRepositoryTrait>,
        remote: Arc<dyn RemoteApi>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            accounts,
            remote,
            event_bus,
        }
    }
}

#[async_trait]
impl JobHandler for ServerSyncJobHandler {
    async fn handle(&self, job: &Job) -> Result<JobOutput> {
        let JobInput::ServerSync { server: domain } = &job.input else {
            return Err(unexpected_input("server.sync", job));
        };

        let existing = self.accounts.get_server(domain)?;
        let was_available = existing.as_ref().is_some_and(|s| s.available);
        let now = now_db_timestamp();

        let server = match self.remote.fetch_server_config(domain).await {
            Ok(config) => Server {
                domain: domain.clone(),
                name: config.name,
                version: config.version,
                available: true,
                created_at: existing
                    .as_ref()
                    .map_or_else(|| now.clone(), |s| s.created_at.clone()),
                synced_at: Some(now),
            },
            Err(err) => {
                debug!("[Accounts] Server {} unavailable: {}", domain, err);
                match existing {
                    Some(server) => Server {
                        available: false,
                        ..server
                    },
                    // Never seen it answer; nothing to record.
                    None => return Ok(JobOutput::Success),
                }
            }
        };

        let available = server.available;
        self.accounts.upsert_server(server).await?;
        if available != was_available {
            info!(
                "[Accounts] Server {} is now {}",
                domain,
                if available { "available" } else { "unavailable" }
            );
            self.event_bus.publish(DomainEvent::ServerAvailabilityChanged {
                domain: domain.clone(),
                available,
            });
        }
        Ok(JobOutput::Success)
    }
}

/// Revokes the token of a signed-out account.
pub struct TokenDeleteJobHandler {
    accounts: Arc<dyn AccountRepositoryTrait>,
    remote: Arc<dyn RemoteApi>,
}

impl TokenDeleteJobHandler {
    pub fn new(accounts: Arc<dyn AccountRepositoryTrait>, remote: Arc<dyn RemoteApi>) -> Self {
        Self { accounts, remote }
    }
}

#[async_trait]
impl JobHandler for TokenDeleteJobHandler {
    async fn handle(&self, job: &Job) -> Result<JobOutput> {
        let JobInput::TokenDelete { token, server } = &job.input else {
            return Err(unexpected_input("token.delete", job));
        };

        if !self.remote.is_reachable(server).await {
            return Ok(JobOutput::Retry {
                delay: UNREACHABLE_RETRY_DELAY,
            });
        }

        match self.remote.revoke_token(server, token).await {
            Ok(()) => {}
            Err(Error::Remote(err)) if !err.retryable => {
                // Already invalid on the server side.
                debug!("[Accounts] Token revocation rejected by {}: {}", server, err);
            }
            Err(err) => return Err(err),
        }

        self.accounts.delete_deleted_token(token).await?;
        info!("[Accounts] Revoked token on {}", server);
        Ok(JobOutput::Success)
    }
}
