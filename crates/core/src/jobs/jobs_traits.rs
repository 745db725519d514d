use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Job, JobInput, JobSchedule, NewJob};
use crate::errors::Result;

#[async_trait]
pub trait JobRepositoryTrait: Send + Sync {
    fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    fn list_jobs(&self) -> Result<Vec<Job>>;

    fn find_waiting_job_by_deduplication_key(&self, key: &str) -> Result<Option<Job>>;

    async fn insert_job(&self, job: NewJob) -> Result<Job>;

    /// Overwrites payload, schedule and retry ceiling of a waiting job in place.
    /// Returns `None` when the job is no longer waiting.
    async fn replace_job(
        &self,
        job_id: &str,
        input: JobInput,
        scheduled_at: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Option<Job>>;

    /// Moves the oldest due waiting job whose concurrency key is not in
    /// `excluded_keys` to `active`. The move is a conditional update, so a job
    /// is claimed at most once even with several claimers on one database.
    async fn claim_next_job(
        &self,
        now: DateTime<Utc>,
        excluded_keys: Vec<String>,
    ) -> Result<Option<Job>>;

    /// Earliest `scheduled_at` among waiting jobs not blocked by `excluded_keys`.
    fn next_waiting_job_at(&self, excluded_keys: &[String]) -> Result<Option<DateTime<Utc>>>;

    async fn delete_job(&self, job_id: &str) -> Result<()>;

    /// Back to `waiting` at `scheduled_at` with the given retry count.
    async fn requeue_job(&self, job_id: &str, scheduled_at: DateTime<Utc>, retries: u32) -> Result<()>;

    /// Crash recovery: every `active` job becomes `waiting` again.
    async fn reset_active_jobs(&self) -> Result<usize>;

    fn get_schedule(&self, schedule_id: &str) -> Result<Option<JobSchedule>>;

    async fn upsert_schedule(&self, schedule: JobSchedule) -> Result<JobSchedule>;

    async fn delete_schedule(&self, schedule_id: &str) -> Result<bool>;

    fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<JobSchedule>>;

    fn next_schedule_at(&self) -> Result<Option<DateTime<Utc>>>;

    async fn set_schedule_next_run(&self, schedule_id: &str, next_run_at: DateTime<Utc>) -> Result<()>;
}
