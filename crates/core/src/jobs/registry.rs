use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Job, JobConcurrency, JobInput, JobOutput, JobType};
use crate::errors::{Error, Result};

/// Executes one job type. Returning `Err` goes through the scheduler's
/// generic retry path; `Ok(JobOutput::Retry { .. })` reschedules without
/// consuming a retry.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn concurrency(&self, _input: &JobInput) -> Option<JobConcurrency> {
        None
    }

    async fn handle(&self, job: &Job) -> Result<JobOutput>;
}

/// Handlers indexed by the tag of [`JobInput`].
#[derive(Default, Clone)]
pub struct JobHandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(job_type, handler);
        self
    }

    pub fn with(mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> Self {
        self.register(job_type, handler);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }
}

/// Error for a handler invoked with another type's input.
pub fn unexpected_input(handler: &str, job: &Job) -> Error {
    Error::unexpected(format!(
        "{} handler received a {} job",
        handler,
        job.input.job_type()
    ))
}
