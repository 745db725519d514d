use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::sleep_scheduler::SleepScheduler;
use super::{
    Job, JobDeduplication, JobHandler, JobHandlerRegistry, JobInput, JobOptions, JobOutput,
    JobRepositoryTrait, JobSchedule, JobScheduleStatus, JobStatus, NewJob,
};
use crate::config::EngineConfig;
use crate::errors::{Error, Result};
use crate::sync::backoff_delay;
use crate::utils::time::millis_until;

const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Floor on the loop's sleep after a storage error, so a failing database
/// does not turn the loop into a spin.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobServiceConfig {
    pub max_concurrency: usize,
    pub max_idle: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl From<&EngineConfig> for JobServiceConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_concurrency: config.jobs_max_concurrency.max(1),
            max_idle: config.jobs_max_idle,
            backoff_base: config.jobs_backoff_base,
            backoff_max: config.jobs_backoff_max,
        }
    }
}

impl Default for JobServiceConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

struct JobCompletion {
    concurrency_key: Option<String>,
}

/// Per-key bookkeeping owned by the jobs loop.
#[derive(Default)]
struct RunningJobs {
    total: usize,
    by_key: HashMap<String, (usize, usize)>,
}

impl RunningJobs {
    fn saturated_keys(&self) -> Vec<String> {
        self.by_key
            .iter()
            .filter(|(_, (count, limit))| count >= limit)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn start(&mut self, key: Option<&str>, limit: usize) {
        self.total += 1;
        if let Some(key) = key {
            let entry = self.by_key.entry(key.to_string()).or_insert((0, limit));
            entry.0 += 1;
            entry.1 = limit;
        }
    }

    fn finish(&mut self, completion: JobCompletion) {
        self.total = self.total.saturating_sub(1);
        if let Some(key) = completion.concurrency_key {
            if let Some(entry) = self.by_key.get_mut(&key) {
                entry.0 = entry.0.saturating_sub(1);
                if entry.0 == 0 {
                    self.by_key.remove(&key);
                }
            }
        }
    }
}

/// Durable job scheduler.
///
/// One loop claims due jobs and hands each to its handler on a separate task;
/// a second loop turns due schedules into jobs. Both sleep on a
/// [`SleepScheduler`] that enqueues wake early.
pub struct JobService {
    repository: Arc<dyn JobRepositoryTrait>,
    registry: JobHandlerRegistry,
    config: JobServiceConfig,
    jobs_sleeper: SleepScheduler,
    schedules_sleeper: SleepScheduler,
    closing: AtomicBool,
    in_flight: AtomicUsize,
    loops: Mutex<Vec<JoinHandle<()>>>,
    deduplication_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl JobService {
    pub fn new(
        repository: Arc<dyn JobRepositoryTrait>,
        registry: JobHandlerRegistry,
        config: JobServiceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            repository,
            registry,
            config,
            jobs_sleeper: SleepScheduler::new(),
            schedules_sleeper: SleepScheduler::new(),
            closing: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            loops: Mutex::new(Vec::new()),
            deduplication_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Recovers jobs interrupted by a crash and starts both loops.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        let started = !self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty();
        if started {
            return Ok(());
        }

        let reset = self.repository.reset_active_jobs().await?;
        if reset > 0 {
            warn!("[Jobs] Reset {} interrupted jobs to waiting", reset);
        }
        self.closing.store(false, Ordering::SeqCst);

        let jobs_loop = tokio::spawn(Arc::clone(self).run_jobs_loop());
        let schedules_loop = tokio::spawn(Arc::clone(self).run_schedules_loop());
        self.loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([jobs_loop, schedules_loop]);
        info!("[Jobs] Scheduler started");
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.repository.get_job(job_id)
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        self.repository.list_jobs()
    }

    pub async fn add_job(&self, input: JobInput, options: JobOptions) -> Result<Job> {
        let job_type = input.job_type();
        let handler = self
            .registry
            .get(job_type)
            .ok_or_else(|| Error::unexpected(format!("No handler registered for {}", job_type)))?;

        let scheduled_at = after(options.delay.unwrap_or_default());
        let new_job = NewJob {
            id: uuid::Uuid::now_v7().to_string(),
            queue: options.queue.clone(),
            concurrency_key: handler.concurrency(&input).map(|c| c.key),
            deduplication_key: options.deduplication.as_ref().map(|d| d.key.clone()),
            input,
            max_retries: options.max_retries,
            scheduled_at,
        };

        let job = match &options.deduplication {
            Some(deduplication) => self.add_deduplicated_job(new_job, deduplication).await?,
            None => self.repository.insert_job(new_job).await?,
        };

        if job.status == JobStatus::Waiting {
            self.jobs_sleeper.wake_at_datetime(&job.scheduled_at);
        }
        Ok(job)
    }

    async fn add_deduplicated_job(&self, new_job: NewJob, deduplication: &JobDeduplication) -> Result<Job> {
        let lock = self.deduplication_lock(&deduplication.key);
        let result = {
            let _guard = lock.lock().await;
            match self
                .repository
                .find_waiting_job_by_deduplication_key(&deduplication.key)?
            {
                Some(existing) if !deduplication.replace => {
                    debug!(
                        "[Jobs] Keeping waiting job {} for key {}",
                        existing.id, deduplication.key
                    );
                    Ok(existing)
                }
                Some(existing) => {
                    let replaced = self
                        .repository
                        .replace_job(
                            &existing.id,
                            new_job.input.clone(),
                            new_job.scheduled_at,
                            new_job.max_retries,
                        )
                        .await;
                    match replaced {
                        Ok(Some(job)) => Ok(job),
                        Ok(None) => {
                            // Claimed between lookup and replace.
                            debug!(
                                "[Jobs] Job {} left waiting before replace, enqueuing for key {}",
                                existing.id, deduplication.key
                            );
                            self.repository.insert_job(new_job).await
                        }
                        Err(e) => Err(e),
                    }
                }
                None => self.repository.insert_job(new_job).await,
            }
        };
        self.release_deduplication_lock(&deduplication.key, lock);
        result
    }

    fn deduplication_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .deduplication_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    fn release_deduplication_lock(&self, key: &str, lock: Arc<AsyncMutex<()>>) {
        drop(lock);
        let mut locks = self
            .deduplication_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    /// Creates or updates a recurring job. A new schedule first fires after
    /// `options.delay` (immediately by default).
    pub async fn upsert_schedule(
        &self,
        schedule_id: &str,
        input: JobInput,
        interval: Duration,
        options: JobOptions,
    ) -> Result<JobSchedule> {
        let job_type = input.job_type();
        if !self.registry.contains(job_type) {
            return Err(Error::unexpected(format!(
                "No handler registered for {}",
                job_type
            )));
        }

        let now = Utc::now();
        let latest = after(interval);
        let (next_run_at, created_at) = match self.repository.get_schedule(schedule_id)? {
            Some(existing) => (existing.next_run_at.min(latest), existing.created_at),
            None => (after(options.delay.unwrap_or_default()), now),
        };

        let saved = self
            .repository
            .upsert_schedule(JobSchedule {
                id: schedule_id.to_string(),
                queue: options.queue,
                input,
                max_retries: options.max_retries,
                interval,
                next_run_at,
                status: JobScheduleStatus::Active,
                created_at,
                updated_at: now,
            })
            .await?;
        self.schedules_sleeper.wake_at_datetime(&saved.next_run_at);
        Ok(saved)
    }

    pub async fn remove_schedule(&self, schedule_id: &str) -> Result<bool> {
        self.repository.delete_schedule(schedule_id).await
    }

    /// Runs a schedule now instead of waiting for its next slot.
    pub async fn trigger_schedule(&self, schedule_id: &str) -> Result<()> {
        if self.repository.get_schedule(schedule_id)?.is_none() {
            return Err(Error::not_found(format!("Job schedule {}", schedule_id)));
        }
        self.repository
            .set_schedule_next_run(schedule_id, Utc::now())
            .await?;
        self.schedules_sleeper.wake_now();
        Ok(())
    }

    /// Stops claiming work and waits for every running handler to finish.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.jobs_sleeper.wake_now();
        self.schedules_sleeper.wake_now();

        let loops = std::mem::take(&mut *self.loops.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in loops {
            if let Err(err) = handle.await {
                warn!("[Jobs] Scheduler loop ended abnormally: {}", err);
            }
        }

        while self.in_flight.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
        }
        info!("[Jobs] Scheduler closed");
    }

    async fn run_jobs_loop(self: Arc<Self>) {
        let (completions_tx, mut completions_rx) = mpsc::unbounded_channel::<JobCompletion>();
        let mut running = RunningJobs::default();

        loop {
            while let Ok(completion) = completions_rx.try_recv() {
                running.finish(completion);
            }
            if self.closing.load(Ordering::SeqCst) {
                break;
            }

            let saturated = running.saturated_keys();
            let mut storage_failed = false;
            if running.total < self.config.max_concurrency {
                match self
                    .repository
                    .claim_next_job(Utc::now(), saturated.clone())
                    .await
                {
                    Ok(Some(job)) => {
                        self.dispatch(job, &mut running, completions_tx.clone());
                        continue;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        error!("[Jobs] Failed to claim next job: {}", err);
                        storage_failed = true;
                    }
                }
            }

            let now = Instant::now();
            let mut target = now + self.config.max_idle;
            if running.total < self.config.max_concurrency {
                match self.repository.next_waiting_job_at(&saturated) {
                    Ok(Some(at)) => target = target.min(instant_at(&at)),
                    Ok(None) => {}
                    Err(err) => {
                        error!("[Jobs] Failed to read next job time: {}", err);
                        storage_failed = true;
                    }
                }
            }
            if storage_failed {
                target = target.max(now + ERROR_BACKOFF);
            }

            tokio::select! {
                _ = self.jobs_sleeper.sleep_until(target) => {}
                Some(completion) = completions_rx.recv() => running.finish(completion),
            }
        }
        debug!("[Jobs] Jobs loop stopped");
    }

    fn dispatch(
        self: &Arc<Self>,
        job: Job,
        running: &mut RunningJobs,
        completions: mpsc::UnboundedSender<JobCompletion>,
    ) {
        let handler = self.registry.get(job.input.job_type());
        let limit = handler
            .as_ref()
            .and_then(|h| h.concurrency(&job.input))
            .map(|c| c.limit.max(1))
            .unwrap_or(1);
        let concurrency_key = job.concurrency_key.clone();
        running.start(concurrency_key.as_deref(), limit);
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.execute(job, handler).await;
            service.in_flight.fetch_sub(1, Ordering::SeqCst);
            let _ = completions.send(JobCompletion { concurrency_key });
        });
    }

    async fn execute(&self, job: Job, handler: Option<Arc<dyn JobHandler>>) {
        let Some(handler) = handler else {
            error!(
                "[Jobs] No handler for {}, dropping job {}",
                job.input.job_type(),
                job.id
            );
            if let Err(err) = self.repository.delete_job(&job.id).await {
                error!("[Jobs] Failed to drop job {}: {}", job.id, err);
            }
            return;
        };

        debug!("[Jobs] Running {} {}", job.input.job_type(), job.id);
        let task_job = job.clone();
        let outcome = match tokio::spawn(async move { handler.handle(&task_job).await }).await {
            Ok(result) => result,
            Err(err) => Err(Error::unexpected(format!("handler panicked: {}", err))),
        };

        if let Err(err) = self.finish(&job, outcome).await {
            error!("[Jobs] Failed to record outcome of job {}: {}", job.id, err);
        }
    }

    async fn finish(&self, job: &Job, outcome: Result<JobOutput>) -> Result<()> {
        match outcome {
            Ok(JobOutput::Success) => {
                debug!("[Jobs] {} {} succeeded", job.input.job_type(), job.id);
                self.repository.delete_job(&job.id).await
            }
            Ok(JobOutput::Retry { delay }) => {
                debug!(
                    "[Jobs] {} {} asked to retry in {:?}",
                    job.input.job_type(),
                    job.id,
                    delay
                );
                self.repository
                    .requeue_job(&job.id, after(delay), job.retries)
                    .await
            }
            Err(err) => {
                let retries = job.retries + 1;
                if retries > job.max_retries {
                    warn!(
                        "[Jobs] {} {} failed {} times, giving up: {}",
                        job.input.job_type(),
                        job.id,
                        retries,
                        err
                    );
                    return self.repository.delete_job(&job.id).await;
                }

                let delay = backoff_delay(retries, self.config.backoff_base, self.config.backoff_max);
                warn!(
                    "[Jobs] {} {} failed (attempt {}), retrying in {:?}: {}",
                    job.input.job_type(),
                    job.id,
                    retries,
                    delay,
                    err
                );
                self.repository
                    .requeue_job(&job.id, after(delay), retries)
                    .await
            }
        }
    }

    async fn run_schedules_loop(self: Arc<Self>) {
        loop {
            if self.closing.load(Ordering::SeqCst) {
                break;
            }

            let now = Utc::now();
            let mut storage_failed = false;
            match self.repository.list_due_schedules(now) {
                Ok(due) => {
                    for schedule in due {
                        if let Err(err) = self.run_schedule(&schedule, now).await {
                            error!("[Jobs] Failed to run schedule {}: {}", schedule.id, err);
                            storage_failed = true;
                        }
                    }
                }
                Err(err) => {
                    error!("[Jobs] Failed to list due schedules: {}", err);
                    storage_failed = true;
                }
            }

            let start = Instant::now();
            let mut target = start + self.config.max_idle;
            match self.repository.next_schedule_at() {
                Ok(Some(at)) => target = target.min(instant_at(&at)),
                Ok(None) => {}
                Err(err) => {
                    error!("[Jobs] Failed to read next schedule time: {}", err);
                    storage_failed = true;
                }
            }
            if storage_failed {
                target = target.max(start + ERROR_BACKOFF);
            }

            self.schedules_sleeper.sleep_until(target).await;
        }
        debug!("[Jobs] Schedules loop stopped");
    }

    async fn run_schedule(&self, schedule: &JobSchedule, now: DateTime<Utc>) -> Result<()> {
        let options = JobOptions {
            queue: schedule.queue.clone(),
            max_retries: schedule.max_retries,
            delay: None,
            deduplication: Some(JobDeduplication {
                key: format!("schedule.{}", schedule.id),
                replace: false,
            }),
        };
        let job = self.add_job(schedule.input.clone(), options).await?;
        debug!("[Jobs] Schedule {} enqueued job {}", schedule.id, job.id);

        let next_run_at = now + to_chrono(schedule.interval);
        self.repository
            .set_schedule_next_run(&schedule.id, next_run_at)
            .await
    }
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365))
}

fn after(delay: Duration) -> DateTime<Utc> {
    Utc::now() + to_chrono(delay)
}

fn instant_at(at: &DateTime<Utc>) -> Instant {
    Instant::now() + Duration::from_millis(millis_until(at))
}
