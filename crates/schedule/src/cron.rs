//! Minute-resolution job scheduler.
//!
//! The cron knows nothing about markdown or pages beyond the opaque
//! `page_id` grouping key. Handlers are invoked after releasing the jobs
//! lock, with a local snapshot of the job; handler errors go to a
//! configurable callback and never disable the job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{watch, Mutex};

use crate::token::{next_occurrence_filtered, FilterToken, ScheduleToken};
use crate::ScheduleError;

/// Callback fired by a due job.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn fire(&self, job: &Job) -> Result<(), ScheduleError>;
}

/// Scheduling state for one registered imperative.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub page_id: String,
    /// The source line, kept so handlers can be rebound after a restart.
    pub line: String,
    pub token: ScheduleToken,
    /// Raw token text (without `@`), kept for persistence.
    pub token_raw: String,
    pub filters: Vec<FilterToken>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub enabled: bool,
}

struct JobEntry {
    job: Job,
    handler: Arc<dyn JobHandler>,
}

pub type ErrorCallback = Arc<dyn Fn(&Job, &ScheduleError) + Send + Sync>;

pub struct Cron {
    tz: chrono_tz::Tz,
    tick_interval: std::time::Duration,
    jobs: Mutex<HashMap<String, JobEntry>>,
    error_cb: ErrorCallback,
    shutdown: std::sync::Mutex<Option<watch::Sender<bool>>>,
}

impl Cron {
    pub fn new() -> Self {
        Self {
            tz: chrono_tz::UTC,
            tick_interval: std::time::Duration::from_secs(60),
            jobs: Mutex::new(HashMap::new()),
            error_cb: Arc::new(|job, err| {
                tracing::error!(
                    job_id = %job.id,
                    page_id = %job.page_id,
                    error = %err,
                    "scheduled job failed"
                );
            }),
            shutdown: std::sync::Mutex::new(None),
        }
    }

    /// Timezone used for next-occurrence computation. Stored instants stay
    /// in UTC.
    pub fn with_timezone(mut self, tz: chrono_tz::Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn with_tick_interval(mut self, interval: std::time::Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_error_callback(mut self, cb: ErrorCallback) -> Self {
        self.error_cb = cb;
        self
    }

    /// Register a job, computing its initial `next_run` from `now`.
    pub async fn add_job(
        &self,
        mut job: Job,
        handler: Arc<dyn JobHandler>,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        job.next_run = Some(self.compute_next(now, &job.token, &job.filters)?);
        let mut jobs = self.jobs.lock().await;
        jobs.insert(job.id.clone(), JobEntry { job, handler });
        Ok(())
    }

    /// Re-insert a job restored from persisted state, trusting its stored
    /// `next_run` and `enabled` flags.
    pub async fn insert_restored(&self, job: Job, handler: Arc<dyn JobHandler>) {
        let mut jobs = self.jobs.lock().await;
        jobs.insert(job.id.clone(), JobEntry { job, handler });
    }

    /// Remove every job belonging to a page. Atomic: a page re-parse
    /// replaces all of its jobs in one step.
    pub async fn remove_jobs_by_page(&self, page_id: &str) -> usize {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, e| e.job.page_id != page_id);
        before - jobs.len()
    }

    pub async fn enable_job(&self, id: &str) -> Result<(), ScheduleError> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| ScheduleError::UnknownJob(id.to_string()))?;
        entry.job.enabled = true;
        Ok(())
    }

    pub async fn disable_job(&self, id: &str) -> Result<(), ScheduleError> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| ScheduleError::UnknownJob(id.to_string()))?;
        entry.job.enabled = false;
        Ok(())
    }

    /// Swap a job's token, recomputing `next_run` when the job is enabled.
    pub async fn update_job_token(
        &self,
        id: &str,
        token: ScheduleToken,
        token_raw: String,
        filters: Vec<FilterToken>,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| ScheduleError::UnknownJob(id.to_string()))?;
        entry.job.token = token;
        entry.job.token_raw = token_raw;
        entry.job.filters = filters;
        if entry.job.enabled {
            entry.job.next_run =
                Some(self.compute_next(now, &entry.job.token, &entry.job.filters)?);
        }
        Ok(())
    }

    pub async fn job(&self, id: &str) -> Option<Job> {
        self.jobs.lock().await.get(id).map(|e| e.job.clone())
    }

    pub async fn jobs_snapshot(&self) -> Vec<Job> {
        self.jobs.lock().await.values().map(|e| e.job.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Fire every due job. Public so tests and the runner can drive the
    /// clock explicitly; the ticker task calls this with `Utc::now()`.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let mut due: Vec<(Job, Arc<dyn JobHandler>)> = {
            let jobs = self.jobs.lock().await;
            jobs.values()
                .filter(|e| {
                    e.job.enabled && e.job.next_run.map(|n| n <= now).unwrap_or(false)
                })
                .map(|e| (e.job.clone(), e.handler.clone()))
                .collect()
        };
        due.sort_by_key(|(j, _)| j.next_run);

        for (job, handler) in due {
            tracing::debug!(job_id = %job.id, page_id = %job.page_id, "firing scheduled job");
            if let Err(e) = handler.fire(&job).await {
                (self.error_cb)(&job, &e);
            }

            let mut jobs = self.jobs.lock().await;
            if let Some(entry) = jobs.get_mut(&job.id) {
                entry.job.last_run = Some(now);
                if entry.job.token.is_recurring() {
                    match self.compute_next(
                        now + Duration::minutes(1),
                        &entry.job.token,
                        &entry.job.filters,
                    ) {
                        Ok(next) => entry.job.next_run = Some(next),
                        Err(e) => {
                            entry.job.enabled = false;
                            entry.job.next_run = None;
                            (self.error_cb)(&entry.job, &e);
                        }
                    }
                } else {
                    entry.job.enabled = false;
                }
            }
        }
    }

    /// Spawn the ticker task. Idempotent: a second call replaces the
    /// previous ticker's shutdown handle.
    pub fn start(self: &Arc<Self>) {
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock().expect("shutdown lock poisoned") = Some(tx);

        let cron = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cron.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => cron.tick(Utc::now()).await,
                    res = rx.changed() => {
                        if res.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("cron ticker stopped");
        });
    }

    /// Stop the ticker task. Jobs remain registered.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().expect("shutdown lock poisoned").take() {
            let _ = tx.send(true);
        }
    }

    pub(crate) fn compute_next(
        &self,
        after: DateTime<Utc>,
        token: &ScheduleToken,
        filters: &[FilterToken],
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let local = after.with_timezone(&self.tz);
        next_occurrence_filtered(token, filters, &local).map(|dt| dt.with_timezone(&Utc))
    }
}

impl Default for Cron {
    fn default() -> Self {
        Self::new()
    }
}
