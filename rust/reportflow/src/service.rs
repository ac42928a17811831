//! Service object wiring the engine, schedule manager and subscription
//! manager over one store, clock and event bus.
//!
//! ```rust,ignore
//! let service = ReportService::builder(store, loader, config).build();
//! service.init().await?;
//! // ...
//! service.dispose().await;
//! ```
//!
//! Several services may coexist in one process; they share nothing unless
//! given the same store.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{SharedClock, SystemClock};
use crate::collaborators::{ChannelRegistry, DatasetLoader, ExportArtifact, ExportOptions};
use crate::config::AppConfig;
use crate::delivery::{SubscriptionManager, SubscriptionStats};
use crate::domain::{
    Execution, ExecutionFilter, ExportFormat, NewSubscription, Parameters, ReportDefinition,
    ReportResult, ScheduleDefinition, ScheduledJob, Subscription, SubscriptionPatch,
};
use crate::engine::{EngineStats, ExecutionEngine, GenerateOptions};
use crate::error::CoreResult;
use crate::events::EventBus;
use crate::scheduler::{CronEvaluator, DefaultCronEvaluator, ScheduleManager, ScheduleOptions, ScheduleStats};
use crate::store::DurableStore;

/// Builder for [`ReportService`]. Clock, cron evaluator, channels and bus
/// default to the system clock, the built-in evaluator, the filesystem and
/// webhook channels, and a fresh bus.
pub struct ReportServiceBuilder {
    store: Arc<dyn DurableStore>,
    loader: Arc<dyn DatasetLoader>,
    config: AppConfig,
    clock: Option<SharedClock>,
    cron: Option<Arc<dyn CronEvaluator>>,
    channels: Option<ChannelRegistry>,
    bus: Option<EventBus>,
}

impl std::fmt::Debug for ReportServiceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportServiceBuilder")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReportServiceBuilder {
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn with_cron(mut self, cron: Arc<dyn CronEvaluator>) -> Self {
        self.cron = Some(cron);
        self
    }

    #[must_use]
    pub fn with_channels(mut self, channels: ChannelRegistry) -> Self {
        self.channels = Some(channels);
        self
    }

    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn build(self) -> ReportService {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cron = self.cron.unwrap_or_else(|| Arc::new(DefaultCronEvaluator));
        let channels = self
            .channels
            .unwrap_or_else(|| ChannelRegistry::with_defaults(&self.config.delivery.output_dir));
        let bus = self.bus.unwrap_or_default();

        let engine = ExecutionEngine::new(
            Arc::clone(&self.store),
            self.loader,
            Arc::clone(&clock),
            bus.clone(),
            &self.config.engine,
        );
        let scheduler = ScheduleManager::new(
            Arc::clone(&self.store),
            engine.clone(),
            channels.clone(),
            Arc::clone(&cron),
            Arc::clone(&clock),
            bus.clone(),
            &self.config.scheduler,
        );
        let subscriptions = SubscriptionManager::new(
            self.store,
            engine.clone(),
            channels,
            cron,
            clock,
            bus.clone(),
            &self.config.delivery,
        );

        ReportService {
            engine,
            scheduler,
            subscriptions,
            bus,
            config: self.config,
            lifecycle: Mutex::new(None),
        }
    }
}

/// Counts loaded by [`ReportService::init`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitSummary {
    pub reports: usize,
    pub schedules: usize,
    pub subscriptions: usize,
}

struct Background {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// The report core behind one facade.
pub struct ReportService {
    engine: ExecutionEngine,
    scheduler: ScheduleManager,
    subscriptions: SubscriptionManager,
    bus: EventBus,
    config: AppConfig,
    lifecycle: Mutex<Option<Background>>,
}

impl std::fmt::Debug for ReportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportService")
            .field("engine", &self.engine)
            .field("scheduler", &self.scheduler)
            .field("subscriptions", &self.subscriptions)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ReportService {
    pub fn builder(
        store: Arc<dyn DurableStore>,
        loader: Arc<dyn DatasetLoader>,
        config: AppConfig,
    ) -> ReportServiceBuilder {
        ReportServiceBuilder {
            store,
            loader,
            config,
            clock: None,
            cron: None,
            channels: None,
            bus: None,
        }
    }

    #[must_use]
    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    #[must_use]
    pub fn scheduler(&self) -> &ScheduleManager {
        &self.scheduler
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().is_some()
    }

    /// Load persisted state and start the enabled background loops. Calling
    /// it again while running only reloads state.
    pub async fn init(&self) -> CoreResult<InitSummary> {
        let summary = InitSummary {
            reports: self.engine.init().await?,
            schedules: self.scheduler.init().await?,
            subscriptions: self.subscriptions.init().await?,
        };

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.is_none() {
            let shutdown = CancellationToken::new();
            let mut tasks = Vec::new();
            if self.config.scheduler.enabled {
                tasks.push(self.scheduler.start(shutdown.child_token()));
            }
            if self.config.delivery.enabled {
                tasks.push(self.subscriptions.start(shutdown.child_token()));
            }
            tracing::info!(loops = tasks.len(), "Background loops started");
            *lifecycle = Some(Background { shutdown, tasks });
        }

        tracing::info!(
            reports = summary.reports,
            schedules = summary.schedules,
            subscriptions = summary.subscriptions,
            "Report service initialized"
        );
        Ok(summary)
    }

    /// Stop the background loops and wait for them to exit.
    pub async fn dispose(&self) {
        let Some(background) = self.lifecycle.lock().take() else {
            return;
        };

        background.shutdown.cancel();
        for joined in futures::future::join_all(background.tasks).await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Background loop ended abnormally");
            }
        }
        tracing::info!("Report service stopped");
    }

    // ========================================================================
    // Reports
    // ========================================================================

    pub async fn register_report(&self, definition: ReportDefinition) -> CoreResult<String> {
        self.engine.register_report(definition).await
    }

    pub async fn get_report(&self, id: &str) -> CoreResult<Option<ReportDefinition>> {
        self.engine.get_report(id).await
    }

    #[must_use]
    pub fn list_reports(&self) -> Vec<ReportDefinition> {
        self.engine.list_reports()
    }

    pub async fn update_report(&self, id: &str, definition: ReportDefinition) -> CoreResult<ReportDefinition> {
        self.engine.update_report(id, definition).await
    }

    /// Delete a report, unscheduling its jobs and disabling its
    /// subscriptions.
    pub async fn delete_report(&self, id: &str) -> CoreResult<()> {
        self.engine.delete_report(id).await?;

        for job in self.scheduler.get_scheduled_reports() {
            if job.report_id == id {
                self.scheduler.unschedule(&job.id).await?;
            }
        }
        for subscription in self.subscriptions.list_subscriptions() {
            if subscription.report_id == id && subscription.enabled {
                self.subscriptions.disable_subscription(&subscription.id).await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Generation and export
    // ========================================================================

    pub async fn generate_report(
        &self,
        report_id: &str,
        parameters: &Parameters,
        options: &GenerateOptions,
    ) -> CoreResult<ReportResult> {
        self.engine.generate_report(report_id, parameters, options).await
    }

    pub async fn execute_async(&self, report_id: &str, parameters: &Parameters) -> CoreResult<String> {
        self.engine.execute_async(report_id, parameters).await
    }

    pub async fn cancel_execution(&self, execution_id: &str) -> CoreResult<bool> {
        self.engine.cancel_execution(execution_id).await
    }

    pub async fn get_execution(&self, execution_id: &str) -> CoreResult<Option<Execution>> {
        self.engine.get_execution(execution_id).await
    }

    #[must_use]
    pub fn get_executions(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        self.engine.get_executions(filter)
    }

    pub async fn export_report(
        &self,
        result: &ReportResult,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> CoreResult<ExportArtifact> {
        self.engine.export_report(result, format, options).await
    }

    pub async fn export_to_multiple(
        &self,
        result: &ReportResult,
        formats: &[ExportFormat],
        options: &ExportOptions,
    ) -> CoreResult<BTreeMap<ExportFormat, ExportArtifact>> {
        self.engine.export_to_multiple(result, formats, options).await
    }

    #[must_use]
    pub fn get_stats(&self) -> EngineStats {
        self.engine.get_stats()
    }

    // ========================================================================
    // Schedules
    // ========================================================================

    pub async fn schedule_report(
        &self,
        report_id: &str,
        definition: ScheduleDefinition,
        options: ScheduleOptions,
    ) -> CoreResult<String> {
        self.scheduler.schedule(report_id, definition, options).await
    }

    pub async fn unschedule_report(&self, schedule_id: &str) -> CoreResult<()> {
        self.scheduler.unschedule(schedule_id).await
    }

    #[must_use]
    pub fn get_scheduled_reports(&self) -> Vec<ScheduledJob> {
        self.scheduler.get_scheduled_reports()
    }

    pub async fn get_schedule_stats(&self) -> CoreResult<ScheduleStats> {
        self.scheduler.get_schedule_stats().await
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub async fn create_subscription(&self, input: NewSubscription) -> CoreResult<Subscription> {
        self.subscriptions.create_subscription(input).await
    }

    pub async fn update_subscription(&self, id: &str, patch: SubscriptionPatch) -> CoreResult<Subscription> {
        self.subscriptions.update_subscription(id, patch).await
    }

    pub async fn delete_subscription(&self, id: &str) -> CoreResult<()> {
        self.subscriptions.delete_subscription(id).await
    }

    pub async fn enable_subscription(&self, id: &str) -> CoreResult<Subscription> {
        self.subscriptions.enable_subscription(id).await
    }

    pub async fn disable_subscription(&self, id: &str) -> CoreResult<Subscription> {
        self.subscriptions.disable_subscription(id).await
    }

    pub async fn deliver_now(&self, id: &str) -> CoreResult<()> {
        self.subscriptions.deliver_now(id).await
    }

    pub async fn get_subscription_stats(&self) -> CoreResult<SubscriptionStats> {
        self.subscriptions.get_subscription_stats().await
    }
}
