//! Schedule manager.
//!
//! A [`ScheduledJob`] binds a report to a [`ScheduleDefinition`]. Enabled jobs
//! with a `next_run` are *armed*: each holds exactly one timer entry keyed by
//! job id. A periodic sweep fires every armed job whose `next_run` has passed.
//!
//! ```text
//! disabled ──schedule/resume──▶ armed ──sweep (next_run ≤ now)──▶ firing
//!    ▲                            ▲                                  │
//!    └──pause / exhausted─────────┴──────────next_run recomputed─────┘
//! ```
//!
//! Firing generates the report without reading the cache, exports it to the
//! job's format, emails it when the job has recipients, appends an
//! [`ExecutionLog`] and recomputes `next_run` from the current time, whether
//! the run succeeded or not.
//!
//! Each sweep detaches its firings, so a run that never finishes holds only
//! its own job. Job record writes go through one async lock, which keeps a
//! firing's bookkeeping from landing on top of a concurrent re-schedule.

pub mod cron;
pub mod next_run;

pub use cron::{CronEvaluator, CronExpression, CronParser, DefaultCronEvaluator};
pub use next_run::{calculate_next_run, parse_timezone, validate_schedule, MAX_HOURLY_INTERVAL};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::collaborators::{ChannelRegistry, DeliveryPayload, ExportOptions};
use crate::config::SchedulerConfig;
use crate::domain::{
    DeliveryConfig, ExecutionLog, ExportFormat, JobRunResult, LogStatus, Parameters,
    ScheduleDefinition, ScheduledJob,
};
use crate::engine::{ExecutionEngine, GenerateOptions};
use crate::error::{CoreResult, ReportError};
use crate::events::{EventBus, ReportEvent};
use crate::logging::OpTimer;
use crate::store::{tables, DurableStore, Repository};

/// Options for [`ScheduleManager::schedule`].
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    /// Job id. Reusing an existing id replaces that job.
    pub id: Option<String>,
    pub parameters: Parameters,
    /// Email recipients of each run's artifact.
    pub recipients: Vec<String>,
    pub format: ExportFormat,
    pub enabled: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            id: None,
            parameters: Parameters::new(),
            recipients: Vec::new(),
            format: ExportFormat::default(),
            enabled: true,
        }
    }
}

impl ScheduleOptions {
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: ExportFormat) -> Self {
        self.format = format;
        self
    }

    /// Persist the job without arming it.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Schedule counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStats {
    pub total: usize,
    pub enabled: usize,
    /// Jobs holding an armed timer.
    pub armed: usize,
    pub runs: u64,
    pub failures: u64,
    pub log_rows: usize,
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    generation: u64,
    due: DateTime<Utc>,
}

/// Artifacts of a successful run.
struct JobOutput {
    execution_id: Option<String>,
    row_count: usize,
    artifact_size: usize,
    location: Option<String>,
}

struct SchedulerInner {
    jobs: Repository<ScheduledJob>,
    logs: Repository<ExecutionLog>,
    engine: ExecutionEngine,
    channels: ChannelRegistry,
    cron: Arc<dyn CronEvaluator>,
    clock: SharedClock,
    bus: EventBus,
    timers: RwLock<HashMap<String, ArmedTimer>>,
    generation: AtomicU64,
    firing: Mutex<HashSet<String>>,
    /// Serialises read-modify-write of job records.
    writes: tokio::sync::Mutex<()>,
    sweep_interval: Duration,
}

/// Removes a job from the firing set when dropped.
struct FiringGuard {
    inner: Arc<SchedulerInner>,
    job_id: String,
}

impl FiringGuard {
    fn acquire(inner: &Arc<SchedulerInner>, job_id: &str) -> Option<Self> {
        inner.firing.lock().insert(job_id.to_string()).then(|| Self {
            inner: Arc::clone(inner),
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for FiringGuard {
    fn drop(&mut self) {
        self.inner.firing.lock().remove(&self.job_id);
    }
}

/// Scheduled report runs.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct ScheduleManager {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for ScheduleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleManager")
            .field("jobs", &self.inner.jobs.cached_len())
            .field("armed", &self.inner.timers.read().len())
            .field("sweep_interval", &self.inner.sweep_interval)
            .finish_non_exhaustive()
    }
}

impl ScheduleManager {
    pub fn new(
        store: Arc<dyn DurableStore>,
        engine: ExecutionEngine,
        channels: ChannelRegistry,
        cron: Arc<dyn CronEvaluator>,
        clock: SharedClock,
        bus: EventBus,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: Repository::new(tables::SCHEDULED_JOBS, Arc::clone(&store)),
                logs: Repository::unmirrored(tables::EXECUTION_LOGS, store),
                engine,
                channels,
                cron,
                clock,
                bus,
                timers: RwLock::new(HashMap::new()),
                generation: AtomicU64::new(0),
                firing: Mutex::new(HashSet::new()),
                writes: tokio::sync::Mutex::new(()),
                sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            }),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Reload persisted jobs and arm the enabled ones. Enabled jobs without a
    /// `next_run` get one computed; exhausted ones are disabled.
    pub async fn init(&self) -> CoreResult<usize> {
        let _writes = self.inner.writes.lock().await;
        let jobs = self.inner.jobs.load_all().await?;
        let now = self.now();

        for mut job in jobs.iter().filter(|j| j.enabled).cloned() {
            if job.next_run.is_none() {
                match calculate_next_run(&job.schedule, now, job.last_run, self.inner.cron.as_ref()) {
                    Ok(Some(next)) => {
                        job.next_run = Some(next);
                        job.updated_at = now;
                    }
                    Ok(None) => job.disable(now),
                    Err(e) => {
                        tracing::warn!(schedule_id = %job.id, error = %e, "Disabling job with unusable schedule");
                        job.disable(now);
                    }
                }
                self.inner.jobs.save(&job).await?;
            }
            self.arm(&job);
        }

        tracing::info!(
            jobs = jobs.len(),
            armed = self.inner.timers.read().len(),
            "Schedule manager initialized"
        );
        Ok(jobs.len())
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Replace the job's timer, or drop it when the job is not runnable.
    fn arm(&self, job: &ScheduledJob) {
        let mut timers = self.inner.timers.write();
        match job.next_run.filter(|_| job.enabled) {
            Some(due) => {
                let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
                timers.insert(job.id.clone(), ArmedTimer { generation, due });
            }
            None => {
                timers.remove(&job.id);
            }
        }
    }

    fn disarm(&self, job_id: &str) {
        self.inner.timers.write().remove(job_id);
    }

    fn timer_generation(&self, job_id: &str) -> Option<u64> {
        self.inner.timers.read().get(job_id).map(|t| t.generation)
    }

    // ========================================================================
    // Job management
    // ========================================================================

    /// Create (or replace) a job and arm it. Returns the job id.
    pub async fn schedule(
        &self,
        report_id: &str,
        definition: ScheduleDefinition,
        options: ScheduleOptions,
    ) -> CoreResult<String> {
        self.inner.engine.require_report(report_id).await?;
        validate_schedule(&definition, self.inner.cron.as_ref())?;

        let _writes = self.inner.writes.lock().await;
        let now = self.now();
        let id = options.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = self
            .inner
            .jobs
            .get(&id)
            .await?
            .map_or(now, |existing| existing.created_at);

        let next_run = if options.enabled {
            calculate_next_run(&definition, now, None, self.inner.cron.as_ref())?
        } else {
            None
        };

        let job = ScheduledJob {
            id,
            report_id: report_id.to_string(),
            schedule: definition,
            parameters: options.parameters,
            recipients: options.recipients,
            format: options.format,
            next_run,
            last_run: None,
            last_result: None,
            enabled: next_run.is_some(),
            run_count: 0,
            failure_count: 0,
            created_at,
            updated_at: now,
        };

        self.inner.jobs.save(&job).await?;
        self.arm(&job);

        tracing::info!(
            schedule_id = %job.id,
            report_id = %job.report_id,
            frequency = job.schedule.frequency.as_str(),
            next_run = ?job.next_run,
            "Report scheduled"
        );
        self.inner.bus.emit(&ReportEvent::ScheduleCreated {
            schedule_id: job.id.clone(),
            report_id: job.report_id.clone(),
            next_run: job.next_run,
        });
        Ok(job.id)
    }

    async fn require_job(&self, id: &str) -> CoreResult<ScheduledJob> {
        self.inner
            .jobs
            .get(id)
            .await?
            .ok_or_else(|| ReportError::not_found("schedule", id))
    }

    /// Stop the timer and remove the job. Its execution logs are kept.
    pub async fn unschedule(&self, id: &str) -> CoreResult<()> {
        let _writes = self.inner.writes.lock().await;
        self.require_job(id).await?;
        self.disarm(id);
        self.inner.jobs.delete(id).await?;

        tracing::info!(schedule_id = %id, "Report unscheduled");
        self.inner.bus.emit(&ReportEvent::ScheduleRemoved {
            schedule_id: id.to_string(),
        });
        Ok(())
    }

    /// Disable a job, keeping its definition.
    pub async fn pause(&self, id: &str) -> CoreResult<ScheduledJob> {
        let _writes = self.inner.writes.lock().await;
        let mut job = self.require_job(id).await?;
        job.disable(self.now());
        self.inner.jobs.save(&job).await?;
        self.disarm(id);

        tracing::info!(schedule_id = %id, "Schedule paused");
        Ok(job)
    }

    /// Re-enable a job with `next_run` computed from now. A one-time job that
    /// already fired stays disabled.
    pub async fn resume(&self, id: &str) -> CoreResult<ScheduledJob> {
        let _writes = self.inner.writes.lock().await;
        let mut job = self.require_job(id).await?;
        let now = self.now();
        job.next_run = calculate_next_run(&job.schedule, now, job.last_run, self.inner.cron.as_ref())?;
        job.enabled = job.next_run.is_some();
        job.updated_at = now;
        self.inner.jobs.save(&job).await?;
        self.arm(&job);

        tracing::info!(schedule_id = %id, next_run = ?job.next_run, "Schedule resumed");
        Ok(job)
    }

    /// Fire a job immediately, outside the sweep.
    pub async fn run_now(&self, id: &str) -> CoreResult<ExecutionLog> {
        self.require_job(id).await?;
        self.fire(id).await
    }

    /// All jobs, oldest first.
    #[must_use]
    pub fn get_scheduled_reports(&self) -> Vec<ScheduledJob> {
        let mut jobs = self.inner.jobs.cached();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub async fn get_job(&self, id: &str) -> CoreResult<Option<ScheduledJob>> {
        self.inner.jobs.get(id).await
    }

    /// Run history of a job, newest first.
    pub async fn get_execution_logs(&self, id: &str, limit: Option<usize>) -> CoreResult<Vec<ExecutionLog>> {
        let mut logs = self.inner.logs.find_by("schedule_id", id).await?;
        logs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = limit {
            logs.truncate(limit);
        }
        Ok(logs)
    }

    pub async fn get_schedule_stats(&self) -> CoreResult<ScheduleStats> {
        let jobs = self.inner.jobs.cached();
        Ok(ScheduleStats {
            total: jobs.len(),
            enabled: jobs.iter().filter(|j| j.enabled).count(),
            armed: self.inner.timers.read().len(),
            runs: jobs.iter().map(|j| j.run_count).sum(),
            failures: jobs.iter().map(|j| j.failure_count).sum(),
            log_rows: self.inner.logs.count().await?,
        })
    }

    // ========================================================================
    // Sweep and firing
    // ========================================================================

    /// Spawn a firing for every armed job that is due and not already
    /// firing. Each firing runs under a supervising task that logs its
    /// outcome, including panics. The returned handles resolve to whether the
    /// firing completed; dropping them detaches the firings.
    pub fn dispatch_due_jobs(&self) -> Vec<JoinHandle<bool>> {
        let now = self.now();
        let due: Vec<String> = self
            .inner
            .timers
            .read()
            .iter()
            .filter(|(_, timer)| timer.due <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let guards: Vec<FiringGuard> = due
            .iter()
            .filter_map(|id| FiringGuard::acquire(&self.inner, id))
            .collect();
        if guards.is_empty() {
            return Vec::new();
        }

        tracing::debug!(due = guards.len(), "Firing due schedules");
        guards
            .into_iter()
            .map(|guard| {
                let manager = self.clone();
                let id = guard.job_id.clone();
                let firing = tokio::spawn(async move { manager.fire_guarded(guard).await });
                tokio::spawn(async move {
                    match firing.await {
                        Ok(Ok(_)) => true,
                        Ok(Err(e)) => {
                            tracing::warn!(schedule_id = %id, error = %e, "Schedule firing failed");
                            false
                        }
                        Err(e) => {
                            tracing::error!(schedule_id = %id, error = %e, "Schedule firing task panicked");
                            false
                        }
                    }
                })
            })
            .collect()
    }

    /// Fire every due job and wait for the firings. Returns how many
    /// completed, whether or not the report run itself succeeded.
    pub async fn run_due_jobs(&self) -> usize {
        futures::future::join_all(self.dispatch_due_jobs())
            .await
            .into_iter()
            .filter(|joined| matches!(joined, Ok(true)))
            .count()
    }

    /// Run one job and record the outcome.
    ///
    /// A job that is deleted or rescheduled while firing only gets its log
    /// row; its new timer is left alone.
    async fn fire(&self, id: &str) -> CoreResult<ExecutionLog> {
        let Some(guard) = FiringGuard::acquire(&self.inner, id) else {
            return Err(ReportError::validation(format!("schedule '{id}' is already running")));
        };
        self.fire_guarded(guard).await
    }

    async fn fire_guarded(&self, guard: FiringGuard) -> CoreResult<ExecutionLog> {
        let id = guard.job_id.as_str();
        let job = self.require_job(id).await?;
        let generation = self.timer_generation(id);
        let started = self.now();
        let timer = OpTimer::new("scheduler", "fire");

        let outcome = self.run_job(&job).await;
        let completed = self.now();
        timer.finish_with_result(outcome.as_ref());

        let status = if outcome.is_ok() {
            LogStatus::Success
        } else {
            LogStatus::Failed
        };
        let mut log = ExecutionLog::new(&job.id, &job.report_id, status, started, completed);
        let run_result = match outcome {
            Ok(output) => {
                log.execution_id.clone_from(&output.execution_id);
                log.row_count = output.row_count;
                log.artifact_size = output.artifact_size;
                log.artifact_location = output.location;
                JobRunResult {
                    status,
                    execution_id: output.execution_id,
                    row_count: output.row_count,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(schedule_id = %job.id, report_id = %job.report_id, error = %message, "Scheduled run failed");
                log.error = Some(message.clone());
                JobRunResult {
                    status,
                    execution_id: None,
                    row_count: 0,
                    error: Some(message),
                }
            }
        };
        self.inner.logs.save(&log).await?;

        let _writes = self.inner.writes.lock().await;
        let current = self.inner.jobs.get(id).await?;
        let Some(mut job) = current.filter(|_| self.timer_generation(id) == generation) else {
            tracing::debug!(schedule_id = %id, "Job changed while firing; keeping its new state");
            return Ok(log);
        };

        job.last_run = Some(started);
        job.last_result = Some(run_result);
        job.run_count += 1;
        if status == LogStatus::Failed {
            job.failure_count += 1;
        }
        job.updated_at = completed;
        if job.enabled {
            match calculate_next_run(&job.schedule, completed, job.last_run, self.inner.cron.as_ref()) {
                Ok(Some(next)) => job.next_run = Some(next),
                Ok(None) => job.disable(completed),
                Err(e) => {
                    tracing::warn!(schedule_id = %id, error = %e, "Disabling job with unusable schedule");
                    job.disable(completed);
                }
            }
        }

        self.inner.jobs.save(&job).await?;
        if self.timer_generation(id) == generation {
            self.arm(&job);
        }

        tracing::info!(
            schedule_id = %id,
            success = status == LogStatus::Success,
            next_run = ?job.next_run,
            "Schedule fired"
        );
        self.inner.bus.emit(&ReportEvent::ScheduleFired {
            schedule_id: job.id.clone(),
            report_id: job.report_id.clone(),
            success: status == LogStatus::Success,
            next_run: job.next_run,
        });
        Ok(log)
    }

    async fn run_job(&self, job: &ScheduledJob) -> CoreResult<JobOutput> {
        let engine = &self.inner.engine;
        let result = engine
            .generate_report(&job.report_id, &job.parameters, &GenerateOptions::fresh())
            .await?;
        let artifact = engine
            .export_report(&result, job.format, &ExportOptions::default())
            .await?;
        let artifact_size = artifact.size();

        let location = if job.recipients.is_empty() {
            None
        } else {
            let subject = format!("Scheduled report: {}", result.report_name);
            let config = DeliveryConfig::Email {
                recipients: job.recipients.clone(),
                subject: Some(subject.clone()),
            };
            let payload = DeliveryPayload::for_result(&result, artifact, subject);
            Some(self.inner.channels.dispatch(&config, &payload).await?)
        };

        Ok(JobOutput {
            execution_id: result.execution_id,
            row_count: result.row_count,
            artifact_size,
            location,
        })
    }

    /// Spawn the periodic sweep. It stops when `shutdown` is cancelled.
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.inner.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = period.as_secs(), "Schedule sweep started");

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let started = manager.dispatch_due_jobs().len();
                        if started > 0 {
                            tracing::debug!(started, "Schedule sweep dispatched firings");
                        }
                    }
                }
            }
            tracing::info!("Schedule sweep stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::collaborators::InMemoryDatasetLoader;
    use crate::config::EngineConfig;
    use crate::domain::{DatasetSpec, ReportDefinition};
    use crate::store::InMemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    struct Fixture {
        manager: ScheduleManager,
        engine: ExecutionEngine,
        clock: ManualClock,
        report_id: String,
    }

    async fn fixture() -> Fixture {
        let rows = [json!({"id": 1}), json!({"id": 2})]
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        let store: Arc<dyn DurableStore> = Arc::new(InMemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        let bus = EventBus::new();
        let engine = ExecutionEngine::new(
            Arc::clone(&store),
            Arc::new(InMemoryDatasetLoader::new().with_table("t", rows)),
            Arc::new(clock.clone()),
            bus.clone(),
            &EngineConfig::default(),
        );
        let report_id = engine
            .register_report(ReportDefinition::new("Daily").with_dataset(DatasetSpec::new("d", "t", ["*"])))
            .await
            .unwrap();
        let manager = ScheduleManager::new(
            store,
            engine.clone(),
            ChannelRegistry::new(),
            Arc::new(DefaultCronEvaluator),
            Arc::new(clock.clone()),
            bus,
            &SchedulerConfig::default(),
        );
        Fixture {
            manager,
            engine,
            clock,
            report_id,
        }
    }

    #[tokio::test]
    async fn test_schedule_requires_existing_report() {
        let f = fixture().await;
        let err = f
            .manager
            .schedule("missing", ScheduleDefinition::daily("09:00"), ScheduleOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_definition_is_rejected() {
        let f = fixture().await;
        let err = f
            .manager
            .schedule(&f.report_id, ScheduleDefinition::cron("* *"), ScheduleOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(f.manager.get_scheduled_reports().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_interval_is_rejected() {
        let f = fixture().await;
        let err = f
            .manager
            .schedule(&f.report_id, ScheduleDefinition::hourly(u32::MAX), ScheduleOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(f.manager.get_scheduled_reports().is_empty());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let f = fixture().await;
        let id = f
            .manager
            .schedule(&f.report_id, ScheduleDefinition::daily("09:00"), ScheduleOptions::default())
            .await
            .unwrap();

        let paused = f.manager.pause(&id).await.unwrap();
        assert!(!paused.enabled);
        assert!(paused.next_run.is_none());
        assert_eq!(f.manager.get_schedule_stats().await.unwrap().armed, 0);

        f.clock.set(Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap());
        let resumed = f.manager.resume(&id).await.unwrap();
        assert!(resumed.enabled);
        assert_eq!(resumed.next_run, Some(Utc.with_ymd_and_hms(2024, 1, 6, 9, 0, 0).unwrap()));
        assert_eq!(f.manager.get_schedule_stats().await.unwrap().armed, 1);
    }

    #[tokio::test]
    async fn test_failed_run_is_logged_and_rescheduled() {
        let f = fixture().await;
        // No email channel is registered, so dispatch fails.
        let id = f
            .manager
            .schedule(
                &f.report_id,
                ScheduleDefinition::hourly(1),
                ScheduleOptions::default().with_recipients(["ops@example.com"]),
            )
            .await
            .unwrap();

        let log = f.manager.run_now(&id).await.unwrap();
        assert_eq!(log.status, LogStatus::Failed);
        assert!(log.error.as_deref().unwrap().contains("email"));

        let job = f.manager.get_job(&id).await.unwrap().unwrap();
        assert_eq!((job.run_count, job.failure_count), (1, 1));
        assert!(job.enabled);
        assert_eq!(job.next_run, Some(Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_run_now_on_paused_job_keeps_it_paused() {
        let f = fixture().await;
        let id = f
            .manager
            .schedule(&f.report_id, ScheduleDefinition::daily("09:00"), ScheduleOptions::default().disabled())
            .await
            .unwrap();

        let log = f.manager.run_now(&id).await.unwrap();
        assert_eq!(log.status, LogStatus::Success);
        assert_eq!(log.row_count, 2);
        assert!(log.execution_id.is_some());

        let job = f.manager.get_job(&id).await.unwrap().unwrap();
        assert!(!job.enabled);
        assert!(job.next_run.is_none());
        assert_eq!(job.run_count, 1);
        assert_eq!(f.engine.get_stats().completed, 1);
    }

    #[tokio::test]
    async fn test_unschedule_keeps_logs() {
        let f = fixture().await;
        let id = f
            .manager
            .schedule(&f.report_id, ScheduleDefinition::hourly(2), ScheduleOptions::default())
            .await
            .unwrap();
        f.manager.run_now(&id).await.unwrap();
        f.manager.unschedule(&id).await.unwrap();

        assert!(f.manager.get_job(&id).await.unwrap().is_none());
        assert_eq!(f.manager.get_execution_logs(&id, None).await.unwrap().len(), 1);
        assert!(f.manager.unschedule(&id).await.unwrap_err().is_not_found());

        let stats = f.manager.get_schedule_stats().await.unwrap();
        assert_eq!((stats.total, stats.armed, stats.log_rows), (0, 0, 1));
    }
}
