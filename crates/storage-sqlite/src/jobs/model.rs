//! Database models for jobs and job schedules.

use std::time::Duration;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use tandem_core::jobs::{Job, JobInput, JobSchedule};
use tandem_core::utils::time::{from_db_timestamp, to_db_timestamp};
use tandem_core::{Error, Result};

use crate::db::{enum_from_db, enum_to_db};

/// Per-job options kept as JSON next to the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredJobOptions {
    pub max_retries: u32,
}

impl StoredJobOptions {
    pub fn to_db(max_retries: u32) -> Result<String> {
        Ok(serde_json::to_string(&StoredJobOptions { max_retries })?)
    }

    pub fn from_db(value: &str) -> Result<Self> {
        Ok(serde_json::from_str(value)?)
    }
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobDB {
    pub id: String,
    pub queue: String,
    pub job_type: String,
    pub input: String,
    pub options: String,
    pub status: String,
    pub retries: i32,
    pub scheduled_at: String,
    pub deduplication_key: Option<String>,
    pub concurrency_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<JobDB> for Job {
    type Error = Error;

    fn try_from(row: JobDB) -> Result<Self> {
        let input: JobInput = serde_json::from_str(&row.input)?;
        let options = StoredJobOptions::from_db(&row.options)?;
        Ok(Job {
            id: row.id,
            queue: row.queue,
            input,
            status: enum_from_db(&row.status)?,
            retries: row.retries.max(0) as u32,
            max_retries: options.max_retries,
            scheduled_at: from_db_timestamp(&row.scheduled_at)?,
            deduplication_key: row.deduplication_key,
            concurrency_key: row.concurrency_key,
            created_at: from_db_timestamp(&row.created_at)?,
            updated_at: from_db_timestamp(&row.updated_at)?,
        })
    }
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::job_schedules)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobScheduleDB {
    pub id: String,
    pub queue: String,
    pub input: String,
    pub options: String,
    pub interval_ms: i64,
    pub next_run_at: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl JobScheduleDB {
    pub fn from_domain(schedule: &JobSchedule) -> Result<Self> {
        Ok(Self {
            id: schedule.id.clone(),
            queue: schedule.queue.clone(),
            input: serde_json::to_string(&schedule.input)?,
            options: StoredJobOptions::to_db(schedule.max_retries)?,
            interval_ms: i64::try_from(schedule.interval.as_millis()).unwrap_or(i64::MAX),
            next_run_at: to_db_timestamp(&schedule.next_run_at),
            status: enum_to_db(&schedule.status)?,
            created_at: to_db_timestamp(&schedule.created_at),
            updated_at: to_db_timestamp(&schedule.updated_at),
        })
    }
}

impl TryFrom<JobScheduleDB> for JobSchedule {
    type Error = Error;

    fn try_from(row: JobScheduleDB) -> Result<Self> {
        let input: JobInput = serde_json::from_str(&row.input)?;
        let options = StoredJobOptions::from_db(&row.options)?;
        Ok(JobSchedule {
            id: row.id,
            queue: row.queue,
            input,
            max_retries: options.max_retries,
            interval: Duration::from_millis(row.interval_ms.max(0) as u64),
            next_run_at: from_db_timestamp(&row.next_run_at)?,
            status: enum_from_db(&row.status)?,
            created_at: from_db_timestamp(&row.created_at)?,
            updated_at: from_db_timestamp(&row.updated_at)?,
        })
    }
}
