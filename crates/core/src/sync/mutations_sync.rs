//! `mutations.sync`: drains a workspace's outbox to the server.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::accounts::AccountRepositoryTrait;
use crate::errors::{Error, Result};
use crate::jobs::{unexpected_input, Job, JobHandler, JobInput, JobOutput, UNREACHABLE_RETRY_DELAY};
use crate::mutations::{MutationPushStatus, MutationRepositoryTrait, MUTATION_MAX_RETRIES};
use crate::remote::RemoteApi;

pub const MUTATIONS_SYNC_BATCH_SIZE: i64 = 50;

pub struct MutationsSyncJobHandler {
    accounts: Arc<dyn AccountRepositoryTrait>,
    mutations: Arc<dyn MutationRepositoryTrait>,
    remote: Arc<dyn RemoteApi>,
}

impl MutationsSyncJobHandler {
    pub fn new(
        accounts: Arc<dyn AccountRepositoryTrait>,
        mutations: Arc<dyn MutationRepositoryTrait>,
        remote: Arc<dyn RemoteApi>,
    ) -> Self {
        Self {
            accounts,
            mutations,
            remote,
        }
    }
}

#[async_trait]
impl JobHandler for MutationsSyncJobHandler {
    async fn handle(&self, job: &Job) -> Result<JobOutput> {
        let JobInput::MutationsSync {
            account_id,
            workspace_id,
        } = &job.input
        else {
            return Err(unexpected_input("mutations.sync", job));
        };

        let Some(account) = self.accounts.get_account(account_id)? else {
            return Ok(JobOutput::Success);
        };
        if !self.remote.is_reachable(&account.server).await {
            return Ok(JobOutput::Retry {
                delay: UNREACHABLE_RETRY_DELAY,
            });
        }

        let mut pushed = 0;
        loop {
            let batch = self
                .mutations
                .list_pending_mutations(workspace_id, MUTATIONS_SYNC_BATCH_SIZE)?;
            if batch.is_empty() {
                break;
            }

            let results = match self
                .remote
                .push_mutations(&account, workspace_id, &batch)
                .await
            {
                Ok(results) => results,
                Err(Error::Remote(err)) if !err.retryable => {
                    warn!(
                        "[Mutations] Server refused a batch of {} for {}: {}",
                        batch.len(),
                        workspace_id,
                        err
                    );
                    let ids = batch.iter().map(|m| m.id.clone()).collect();
                    self.mutations
                        .mark_mutations_failed(ids, MUTATION_MAX_RETRIES)
                        .await?;
                    return Ok(JobOutput::Success);
                }
                Err(err) => return Err(err),
            };

            let mut acknowledged = Vec::new();
            let mut answered = HashSet::new();
            for result in &results {
                answered.insert(result.id.as_str());
                match result.status {
                    MutationPushStatus::Accepted => acknowledged.push(result.id.clone()),
                    MutationPushStatus::Rejected => {
                        warn!("[Mutations] Server rejected mutation {}", result.id);
                        acknowledged.push(result.id.clone());
                    }
                    MutationPushStatus::Failed => {}
                }
            }
            // Anything the server did not acknowledge counts as a failed push.
            let failed: Vec<String> = batch
                .iter()
                .filter(|m| !acknowledged.contains(&m.id))
                .map(|m| m.id.clone())
                .collect();
            if answered.len() < batch.len() {
                debug!(
                    "[Mutations] {} of {} mutations got no answer",
                    batch.len() - answered.len(),
                    batch.len()
                );
            }

            pushed += self.mutations.delete_mutations(acknowledged).await?;
            if !failed.is_empty() {
                let dropped = self
                    .mutations
                    .mark_mutations_failed(failed, MUTATION_MAX_RETRIES)
                    .await?;
                if dropped > 0 {
                    warn!(
                        "[Mutations] Dropped {} mutations after {} failed pushes",
                        dropped, MUTATION_MAX_RETRIES
                    );
                }
                return Ok(JobOutput::Retry {
                    delay: UNREACHABLE_RETRY_DELAY,
                });
            }
            if (batch.len() as i64) < MUTATIONS_SYNC_BATCH_SIZE {
                break;
            }
        }

        if pushed > 0 {
            info!("[Mutations] Pushed {} mutations for {}", pushed, workspace_id);
        }
        Ok(JobOutput::Success)
    }
}
