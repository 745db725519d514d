//! Event-driven and recurring job sources.

use std::sync::Arc;
use std::time::Duration;

use log::warn;

use super::{JobInput, JobOptions, JobService};
use crate::errors::Result;
use crate::events::{EventBus, SubscriptionId};

pub const FILES_CLEAN_TEMP_SCHEDULE_ID: &str = "files.clean.temp";
pub const FILES_CLEAN_TEMP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const SERVER_SYNC_INTERVAL: Duration = Duration::from_secs(60);
pub const ACCOUNT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Enqueues one `mutations.sync` job per burst of committed node changes in
/// `workspace_id`. Waiting jobs are reused through deduplication.
pub fn subscribe_mutation_sync(
    event_bus: &dyn EventBus,
    jobs: Arc<JobService>,
    account_id: String,
    workspace_id: String,
) -> SubscriptionId {
    event_bus.subscribe(Arc::new(move |event| {
        if !event.is_node_change() || event.workspace_id() != Some(workspace_id.as_str()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("[Jobs] No runtime to enqueue mutations.sync for {}", workspace_id);
            return;
        };

        let jobs = Arc::clone(&jobs);
        let input = JobInput::MutationsSync {
            account_id: account_id.clone(),
            workspace_id: workspace_id.clone(),
        };
        let key = format!("mutations.sync.{}", workspace_id);
        runtime.spawn(async move {
            if let Err(err) = jobs.add_job(input, JobOptions::deduplicate(key, false)).await {
                warn!("[Jobs] Failed to enqueue mutations.sync: {}", err);
            }
        });
    }))
}

pub async fn schedule_temp_file_cleanup(jobs: &JobService) -> Result<()> {
    jobs.upsert_schedule(
        FILES_CLEAN_TEMP_SCHEDULE_ID,
        JobInput::FilesCleanTemp {},
        FILES_CLEAN_TEMP_INTERVAL,
        JobOptions::default(),
    )
    .await
    .map(|_| ())
}

/// Recurring `server.sync` and `account.sync` for a signed-in account.
pub async fn schedule_account_sync(jobs: &JobService, account_id: &str, server: &str) -> Result<()> {
    jobs.upsert_schedule(
        &format!("server.sync.{}", server),
        JobInput::ServerSync {
            server: server.to_string(),
        },
        SERVER_SYNC_INTERVAL,
        JobOptions::default(),
    )
    .await?;
    jobs.upsert_schedule(
        &format!("account.sync.{}", account_id),
        JobInput::AccountSync {
            account_id: account_id.to_string(),
        },
        ACCOUNT_SYNC_INTERVAL,
        JobOptions::default(),
    )
    .await?;
    Ok(())
}
