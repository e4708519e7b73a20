//! The schedule runner: composes imperative extraction, the cron, and the
//! persisted state file with page identity.
//!
//! Firings reach the host through the [`ScheduleHandler`] seam; the cron
//! stays oblivious to what a notification or an action means.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::cron::{Cron, Job, JobHandler};
use crate::imperative::{self, Imperative, ImperativeKind, ParseWarning};
use crate::persist::{self, PersistedJob, PersistedState, STATE_FILE};
use crate::token::parse_token;
use crate::ScheduleError;

/// Host-side seams for job firings.
#[async_trait::async_trait]
pub trait ScheduleHandler: Send + Sync {
    async fn on_notify(&self, page_id: &str, message: &str) -> Result<(), ScheduleError>;

    async fn on_action(
        &self,
        page_id: &str,
        action: &str,
        args: &IndexMap<String, String>,
        message: &str,
    ) -> Result<(), ScheduleError>;
}

/// Routes one imperative's firings to the host handler.
struct ImperativeJob {
    imperative: Imperative,
    handler: Arc<dyn ScheduleHandler>,
}

#[async_trait::async_trait]
impl JobHandler for ImperativeJob {
    async fn fire(&self, job: &Job) -> Result<(), ScheduleError> {
        match self.imperative.kind {
            ImperativeKind::Notify => {
                self.handler
                    .on_notify(&job.page_id, &self.imperative.message)
                    .await
            }
            ImperativeKind::RunAction => {
                let name = self.imperative.action_name.as_deref().unwrap_or("");
                self.handler
                    .on_action(
                        &job.page_id,
                        name,
                        &self.imperative.args,
                        &self.imperative.message,
                    )
                    .await
            }
        }
    }
}

pub struct ScheduleRunner {
    cron: Arc<Cron>,
    tz: chrono_tz::Tz,
    tick_interval: std::time::Duration,
    handler: Arc<dyn ScheduleHandler>,
    state_dir: Option<PathBuf>,
    warnings: std::sync::Mutex<HashMap<String, Vec<ParseWarning>>>,
}

impl ScheduleRunner {
    pub fn new(handler: Arc<dyn ScheduleHandler>) -> Self {
        Self {
            cron: Arc::new(Cron::new()),
            tz: chrono_tz::UTC,
            tick_interval: std::time::Duration::from_secs(60),
            handler,
            state_dir: None,
            warnings: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Persist job state under this directory on `stop` and reload it on
    /// `start`.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Builder-time only: replaces the cron, dropping any registered jobs.
    pub fn with_timezone(mut self, tz: chrono_tz::Tz) -> Self {
        self.tz = tz;
        self.rebuild_cron();
        self
    }

    /// Builder-time only: replaces the cron, dropping any registered jobs.
    pub fn with_tick_interval(mut self, interval: std::time::Duration) -> Self {
        self.tick_interval = interval;
        self.rebuild_cron();
        self
    }

    fn rebuild_cron(&mut self) {
        self.cron = Arc::new(
            Cron::new()
                .with_timezone(self.tz)
                .with_tick_interval(self.tick_interval),
        );
    }

    pub fn cron(&self) -> &Arc<Cron> {
        &self.cron
    }

    /// Re-parse a page's text, replacing every job previously registered
    /// for it. Returns the number of scheduled jobs.
    pub async fn sync_page(&self, page_id: &str, text: &str) -> usize {
        self.sync_page_at(page_id, text, Utc::now()).await
    }

    /// Deterministic variant of [`sync_page`](Self::sync_page) for tests
    /// and replay.
    pub async fn sync_page_at(&self, page_id: &str, text: &str, now: DateTime<Utc>) -> usize {
        let extracted = imperative::extract(text);
        let mut page_warnings = extracted.warnings;

        self.cron.remove_jobs_by_page(page_id).await;

        let mut registered = 0;
        for imp in extracted.imperatives {
            let (token, token_raw) = match (&imp.token, &imp.token_raw) {
                (Some(t), Some(r)) => (t.clone(), r.clone()),
                // Imperatives without a schedule token are legal but have
                // nothing to register.
                _ => continue,
            };

            let job = Job {
                id: uuid::Uuid::new_v4().to_string(),
                page_id: page_id.to_string(),
                line: imp.raw.clone(),
                token,
                token_raw,
                filters: imp.filters.clone(),
                next_run: None,
                last_run: None,
                enabled: true,
            };
            let handler = Arc::new(ImperativeJob {
                imperative: imp,
                handler: self.handler.clone(),
            });
            match self.cron.add_job(job, handler, now).await {
                Ok(()) => registered += 1,
                Err(e) => page_warnings.push(ParseWarning {
                    line_no: 0,
                    message: format!("could not schedule job: {e}"),
                }),
            }
        }

        info!(page_id, jobs = registered, "page schedules synced");
        self.warnings
            .lock()
            .expect("warnings lock poisoned")
            .insert(page_id.to_string(), page_warnings);
        registered
    }

    /// Parse warnings accumulated for a page during its last sync.
    pub fn warnings(&self, page_id: &str) -> Vec<ParseWarning> {
        self.warnings
            .lock()
            .expect("warnings lock poisoned")
            .get(page_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.cron.jobs_snapshot().await
    }

    /// Load persisted state (if configured) and start the ticker.
    pub async fn start(&self) -> Result<(), ScheduleError> {
        self.load_state(Utc::now()).await?;
        self.cron.start();
        Ok(())
    }

    /// Stop the ticker and persist state (if configured).
    pub async fn stop(&self) -> Result<(), ScheduleError> {
        self.cron.stop();
        self.save_state().await
    }

    /// Serialize the current jobs to the state file.
    pub async fn save_state(&self) -> Result<(), ScheduleError> {
        let dir = match &self.state_dir {
            Some(d) => d,
            None => return Ok(()),
        };
        let jobs = self.cron.jobs_snapshot().await;
        let state = PersistedState {
            jobs: jobs
                .into_iter()
                .map(|j| PersistedJob {
                    id: j.id,
                    page_id: j.page_id,
                    line: j.line,
                    next_run: j.next_run,
                    last_run: j.last_run,
                    enabled: j.enabled,
                    token_raw: j.token_raw,
                })
                .collect(),
        };
        persist::save(&state_path(dir), &state)
    }

    /// Rehydrate jobs from the state file. Tokens are re-parsed from
    /// `token_raw`, handlers are rebound by re-parsing the stored line, and
    /// stale recurring `next_run` instants roll forward past `now`.
    pub async fn load_state(&self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let dir = match &self.state_dir {
            Some(d) => d,
            None => return Ok(()),
        };
        let path = state_path(dir);
        if !path.exists() {
            return Ok(());
        }
        let state = persist::load(&path)?;

        for rec in state.jobs {
            let token = match parse_token(&rec.token_raw) {
                Ok(t) => t,
                Err(e) => {
                    warn!(job_id = %rec.id, error = %e, "dropping persisted job with stale token");
                    continue;
                }
            };
            let mut line_warnings = Vec::new();
            let imp = match imperative::parse_line(rec.line.trim(), 0, &mut line_warnings) {
                Some(imp) => imp,
                None => {
                    warn!(job_id = %rec.id, "dropping persisted job with unparsable line");
                    continue;
                }
            };

            let mut job = Job {
                id: rec.id,
                page_id: rec.page_id,
                line: rec.line,
                token,
                token_raw: rec.token_raw,
                filters: imp.filters.clone(),
                next_run: rec.next_run,
                last_run: rec.last_run,
                enabled: rec.enabled,
            };

            // Roll stale recurring schedules forward to the next valid instant.
            let stale = job.next_run.map(|n| n <= now).unwrap_or(true);
            if stale && job.enabled && job.token.is_recurring() {
                match self.cron.compute_next(now, &job.token, &job.filters) {
                    Ok(next) => job.next_run = Some(next),
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "could not roll job forward");
                        continue;
                    }
                }
            }

            let handler = Arc::new(ImperativeJob {
                imperative: imp,
                handler: self.handler.clone(),
            });
            self.cron.insert_restored(job, handler).await;
        }

        info!(count = self.cron.len().await, "schedule state restored");
        Ok(())
    }
}

fn state_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Default)]
    struct Recording {
        notifies: std::sync::Mutex<Vec<(String, String)>>,
        actions: std::sync::Mutex<Vec<(String, String, IndexMap<String, String>)>>,
    }

    #[async_trait::async_trait]
    impl ScheduleHandler for Recording {
        async fn on_notify(&self, page_id: &str, message: &str) -> Result<(), ScheduleError> {
            self.notifies
                .lock()
                .unwrap()
                .push((page_id.to_string(), message.to_string()));
            Ok(())
        }

        async fn on_action(
            &self,
            page_id: &str,
            action: &str,
            args: &IndexMap<String, String>,
            _message: &str,
        ) -> Result<(), ScheduleError> {
            self.actions.lock().unwrap().push((
                page_id.to_string(),
                action.to_string(),
                args.clone(),
            ));
            Ok(())
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[tokio::test]
    async fn notify_fires_exactly_once_per_occurrence() {
        let handler = Arc::new(Recording::default());
        let runner = ScheduleRunner::new(handler.clone());

        let registered = runner
            .sync_page_at("standup.md", "Notify @daily:9am Morning standup\n", utc(2024, 1, 15, 8, 0))
            .await;
        assert_eq!(registered, 1);

        runner.cron().tick(utc(2024, 1, 15, 9, 0)).await;
        assert_eq!(
            handler.notifies.lock().unwrap().as_slice(),
            [("standup.md".to_string(), "Morning standup".to_string())]
        );

        let jobs = runner.jobs().await;
        assert_eq!(jobs[0].next_run, Some(utc(2024, 1, 16, 9, 0)));

        runner.cron().tick(utc(2024, 1, 15, 9, 1)).await;
        assert_eq!(handler.notifies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_action_reaches_on_action_with_args() {
        let handler = Arc::new(Recording::default());
        let runner = ScheduleRunner::new(handler.clone());

        runner
            .sync_page_at(
                "ops.md",
                "Run action:cleanup @daily:9am --depth 3\n",
                utc(2024, 1, 15, 8, 0),
            )
            .await;
        runner.cron().tick(utc(2024, 1, 15, 9, 0)).await;

        let actions = handler.actions.lock().unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].1, "cleanup");
        assert_eq!(actions[0].2.get("depth").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn resync_replaces_page_jobs() {
        let handler = Arc::new(Recording::default());
        let runner = ScheduleRunner::new(handler);
        let now = utc(2024, 1, 15, 8, 0);

        runner
            .sync_page_at("p.md", "Notify @daily:9am a\nNotify @daily:5pm b\n", now)
            .await;
        assert_eq!(runner.jobs().await.len(), 2);

        runner.sync_page_at("p.md", "Notify @daily:7am only\n", now).await;
        let jobs = runner.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].token_raw, "daily:7am");
    }

    #[tokio::test]
    async fn tokenless_imperatives_register_nothing() {
        let handler = Arc::new(Recording::default());
        let runner = ScheduleRunner::new(handler);
        let n = runner
            .sync_page_at("p.md", "Notify remember the milk\n", utc(2024, 1, 15, 8, 0))
            .await;
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn warnings_surface_through_runner() {
        let handler = Arc::new(Recording::default());
        let runner = ScheduleRunner::new(handler);
        runner
            .sync_page_at("p.md", "Notify @nonsense do it\n", utc(2024, 1, 15, 8, 0))
            .await;
        assert_eq!(runner.warnings("p.md").len(), 1);
        assert!(runner.warnings("other.md").is_empty());
    }

    #[tokio::test]
    async fn persistence_round_trip_rebinds_and_rolls_forward() {
        let handler = Arc::new(Recording::default());
        let dir = tempfile::tempdir().unwrap();

        let runner = ScheduleRunner::new(handler.clone()).with_state_dir(dir.path());
        runner
            .sync_page_at("standup.md", "Notify @daily:9am Morning standup\n", utc(2024, 1, 15, 8, 0))
            .await;
        let original_id = runner.jobs().await[0].id.clone();
        runner.stop().await.unwrap();

        // New process: reload with a clock two days ahead; the stale
        // next_run must roll forward, and the handler must fire again.
        let handler2 = Arc::new(Recording::default());
        let runner2 = ScheduleRunner::new(handler2.clone()).with_state_dir(dir.path());
        runner2.load_state(utc(2024, 1, 17, 8, 0)).await.unwrap();

        let jobs = runner2.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, original_id);
        assert!(jobs[0].enabled);
        assert_eq!(jobs[0].next_run, Some(utc(2024, 1, 17, 9, 0)));

        runner2.cron().tick(utc(2024, 1, 17, 9, 0)).await;
        assert_eq!(
            handler2.notifies.lock().unwrap().as_slice(),
            [("standup.md".to_string(), "Morning standup".to_string())]
        );
    }

    #[tokio::test]
    async fn disabled_jobs_stay_disabled_across_restart() {
        let handler = Arc::new(Recording::default());
        let dir = tempfile::tempdir().unwrap();

        let runner = ScheduleRunner::new(handler.clone()).with_state_dir(dir.path());
        runner
            .sync_page_at("p.md", "Notify @in:1h one shot\n", utc(2024, 1, 15, 8, 0))
            .await;
        // Fire the one-shot; it disables itself.
        runner.cron().tick(utc(2024, 1, 15, 9, 0)).await;
        runner.stop().await.unwrap();

        let runner2 = ScheduleRunner::new(handler).with_state_dir(dir.path());
        runner2.load_state(utc(2024, 1, 16, 8, 0)).await.unwrap();
        let jobs = runner2.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(!jobs[0].enabled);
    }
}
