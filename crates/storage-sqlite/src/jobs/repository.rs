use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::min;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;

use tandem_core::jobs::{
    Job, JobInput, JobRepositoryTrait, JobSchedule, JobScheduleStatus, JobStatus, NewJob,
};
use tandem_core::utils::time::{from_db_timestamp, now_db_timestamp, to_db_timestamp};
use tandem_core::Result;

use super::model::{JobDB, JobScheduleDB, StoredJobOptions};
use crate::db::{enum_to_db, get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{job_schedules, jobs};

fn load_job(conn: &mut SqliteConnection, job_id: &str) -> Result<Option<Job>> {
    jobs::table
        .find(job_id)
        .select(JobDB::as_select())
        .first::<JobDB>(conn)
        .optional()
        .map_err(StorageError::from)?
        .map(Job::try_from)
        .transpose()
}

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(from_db_timestamp).transpose()
}

pub struct JobRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl JobRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl JobRepositoryTrait for JobRepository {
    fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let mut conn = get_connection(&self.pool)?;
        load_job(&mut conn, job_id)
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = jobs::table
            .order((jobs::scheduled_at.asc(), jobs::id.asc()))
            .select(JobDB::as_select())
            .load::<JobDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(Job::try_from).collect()
    }

    fn find_waiting_job_by_deduplication_key(&self, key: &str) -> Result<Option<Job>> {
        let mut conn = get_connection(&self.pool)?;
        let waiting = enum_to_db(&JobStatus::Waiting)?;
        jobs::table
            .filter(jobs::deduplication_key.eq(key))
            .filter(jobs::status.eq(waiting))
            .select(JobDB::as_select())
            .first::<JobDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
            .map(Job::try_from)
            .transpose()
    }

    async fn insert_job(&self, job: NewJob) -> Result<Job> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Job> {
                let now = now_db_timestamp();
                let row = JobDB {
                    id: job.id.clone(),
                    queue: job.queue,
                    job_type: job.input.job_type().as_str().to_string(),
                    input: serde_json::to_string(&job.input)?,
                    options: StoredJobOptions::to_db(job.max_retries)?,
                    status: enum_to_db(&JobStatus::Waiting)?,
                    retries: 0,
                    scheduled_at: to_db_timestamp(&job.scheduled_at),
                    deduplication_key: job.deduplication_key,
                    concurrency_key: job.concurrency_key,
                    created_at: now.clone(),
                    updated_at: now,
                };
                diesel::insert_into(jobs::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Job::try_from(row)
            })
            .await
    }

    async fn replace_job(
        &self,
        job_id: &str,
        input: JobInput,
        scheduled_at: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Option<Job>> {
        let job_id = job_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Option<Job>> {
                let waiting = enum_to_db(&JobStatus::Waiting)?;
                let updated = diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(&job_id))
                        .filter(jobs::status.eq(waiting)),
                )
                .set((
                    jobs::job_type.eq(input.job_type().as_str()),
                    jobs::input.eq(serde_json::to_string(&input)?),
                    jobs::options.eq(StoredJobOptions::to_db(max_retries)?),
                    jobs::scheduled_at.eq(to_db_timestamp(&scheduled_at)),
                    jobs::updated_at.eq(now_db_timestamp()),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                if updated == 0 {
                    return Ok(None);
                }
                load_job(conn, &job_id)
            })
            .await
    }

    async fn claim_next_job(
        &self,
        now: DateTime<Utc>,
        excluded_keys: Vec<String>,
    ) -> Result<Option<Job>> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Option<Job>> {
                let waiting = enum_to_db(&JobStatus::Waiting)?;
                let mut query = jobs::table
                    .select(JobDB::as_select())
                    .filter(jobs::status.eq(waiting.clone()))
                    .filter(jobs::scheduled_at.le(to_db_timestamp(&now)))
                    .into_boxed();
                if !excluded_keys.is_empty() {
                    query = query.filter(
                        jobs::concurrency_key
                            .is_null()
                            .or(jobs::concurrency_key.ne_all(excluded_keys)),
                    );
                }
                let Some(candidate) = query
                    .order((jobs::scheduled_at.asc(), jobs::id.asc()))
                    .first::<JobDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?
                else {
                    return Ok(None);
                };

                // Only a row still waiting can be claimed; a second claimer
                // on the same database sees zero affected rows.
                let claimed = diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(&candidate.id))
                        .filter(jobs::status.eq(waiting)),
                )
                .set((
                    jobs::status.eq(enum_to_db(&JobStatus::Active)?),
                    jobs::updated_at.eq(now_db_timestamp()),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                if claimed == 0 {
                    return Ok(None);
                }
                load_job(conn, &candidate.id)
            })
            .await
    }

    fn next_waiting_job_at(&self, excluded_keys: &[String]) -> Result<Option<DateTime<Utc>>> {
        let mut conn = get_connection(&self.pool)?;
        let waiting = enum_to_db(&JobStatus::Waiting)?;
        let mut query = jobs::table
            .filter(jobs::status.eq(waiting))
            .select(min(jobs::scheduled_at))
            .into_boxed();
        if !excluded_keys.is_empty() {
            query = query.filter(
                jobs::concurrency_key
                    .is_null()
                    .or(jobs::concurrency_key.ne_all(excluded_keys.to_vec())),
            );
        }
        let earliest = query
            .first::<Option<String>>(&mut conn)
            .map_err(StorageError::from)?;
        parse_optional_timestamp(earliest)
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let job_id = job_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::delete(jobs::table.find(job_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn requeue_job(&self, job_id: &str, scheduled_at: DateTime<Utc>, retries: u32) -> Result<()> {
        let job_id = job_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::update(jobs::table.find(job_id))
                    .set((
                        jobs::status.eq(enum_to_db(&JobStatus::Waiting)?),
                        jobs::scheduled_at.eq(to_db_timestamp(&scheduled_at)),
                        jobs::retries.eq(i32::try_from(retries).unwrap_or(i32::MAX)),
                        jobs::updated_at.eq(now_db_timestamp()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn reset_active_jobs(&self) -> Result<usize> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let reset = diesel::update(
                    jobs::table.filter(jobs::status.eq(enum_to_db(&JobStatus::Active)?)),
                )
                .set((
                    jobs::status.eq(enum_to_db(&JobStatus::Waiting)?),
                    jobs::updated_at.eq(now_db_timestamp()),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(reset)
            })
            .await
    }

    fn get_schedule(&self, schedule_id: &str) -> Result<Option<JobSchedule>> {
        let mut conn = get_connection(&self.pool)?;
        job_schedules::table
            .find(schedule_id)
            .select(JobScheduleDB::as_select())
            .first::<JobScheduleDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
            .map(JobSchedule::try_from)
            .transpose()
    }

    async fn upsert_schedule(&self, schedule: JobSchedule) -> Result<JobSchedule> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<JobSchedule> {
                let row = JobScheduleDB::from_domain(&schedule)?;
                diesel::insert_into(job_schedules::table)
                    .values(&row)
                    .on_conflict(job_schedules::id)
                    .do_update()
                    .set((
                        job_schedules::queue.eq(&row.queue),
                        job_schedules::input.eq(&row.input),
                        job_schedules::options.eq(&row.options),
                        job_schedules::interval_ms.eq(row.interval_ms),
                        job_schedules::next_run_at.eq(&row.next_run_at),
                        job_schedules::status.eq(&row.status),
                        job_schedules::updated_at.eq(&row.updated_at),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(schedule)
            })
            .await
    }

    async fn delete_schedule(&self, schedule_id: &str) -> Result<bool> {
        let schedule_id = schedule_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                let deleted = diesel::delete(job_schedules::table.find(schedule_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(deleted > 0)
            })
            .await
    }

    fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<JobSchedule>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = job_schedules::table
            .filter(job_schedules::status.eq(enum_to_db(&JobScheduleStatus::Active)?))
            .filter(job_schedules::next_run_at.le(to_db_timestamp(&now)))
            .order(job_schedules::next_run_at.asc())
            .select(JobScheduleDB::as_select())
            .load::<JobScheduleDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(JobSchedule::try_from).collect()
    }

    fn next_schedule_at(&self) -> Result<Option<DateTime<Utc>>> {
        let mut conn = get_connection(&self.pool)?;
        let earliest = job_schedules::table
            .filter(job_schedules::status.eq(enum_to_db(&JobScheduleStatus::Active)?))
            .select(min(job_schedules::next_run_at))
            .first::<Option<String>>(&mut conn)
            .map_err(StorageError::from)?;
        parse_optional_timestamp(earliest)
    }

    async fn set_schedule_next_run(&self, schedule_id: &str, next_run_at: DateTime<Utc>) -> Result<()> {
        let schedule_id = schedule_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::update(job_schedules::table.find(schedule_id))
                    .set((
                        job_schedules::next_run_at.eq(to_db_timestamp(&next_run_at)),
                        job_schedules::updated_at.eq(now_db_timestamp()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}
