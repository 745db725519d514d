//! `files.clean.temp`: best-effort removal of stale temporary files.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::{debug, warn};

use crate::errors::Result;
use crate::jobs::{unexpected_input, Job, JobHandler, JobInput, JobOutput};

pub struct TempFileCleanupJobHandler {
    temp_dir: PathBuf,
    max_age: Duration,
}

impl TempFileCleanupJobHandler {
    pub fn new(temp_dir: PathBuf, max_age: Duration) -> Self {
        Self { temp_dir, max_age }
    }

    /// Deletes regular files in the temp directory last modified more than
    /// `max_age` ago. Individual failures are logged and skipped.
    pub async fn clean(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(err) => {
                debug!(
                    "[Files] Temp directory {} not readable: {}",
                    self.temp_dir.display(),
                    err
                );
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!("[Files] Stopped scanning temp directory: {}", err);
                    break;
                }
            };
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < self.max_age {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(
                    "[Files] Could not remove {}: {}",
                    entry.path().display(),
                    err
                ),
            }
        }
        removed
    }
}

#[async_trait]
impl JobHandler for TempFileCleanupJobHandler {
    async fn handle(&self, job: &Job) -> Result<JobOutput> {
        if !matches!(job.input, JobInput::FilesCleanTemp {}) {
            return Err(unexpected_input("files.clean.temp", job));
        }
        let removed = self.clean().await;
        if removed > 0 {
            debug!("[Files] Removed {} stale temp files", removed);
        }
        Ok(JobOutput::Success)
    }
}
