//! Report execution engine.
//!
//! Turns a report definition plus runtime parameters into a [`ReportResult`]:
//!
//! ```text
//! bind params → cache? ─hit──────────────────────────────────────────▶ result
//!                  │miss
//!                  ▼
//! before hook → load (30) → filter (50) → aggregate (70) → sort (80)
//!             → visualize (90) → after hook → completed (100) → cache write
//! ```
//!
//! Every run that misses the cache is tracked as an [`Execution`]. A
//! cancellation flips the execution to `cancelled`; the pipeline notices at
//! the next stage boundary and returns [`ReportError::Cancelled`]. Cancelled
//! runs are never cached.

pub mod cache;
pub mod params;
pub mod pipeline;

pub use cache::{canonical_json, CacheStats, ResultCache};
pub use params::bind_parameters;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::collaborators::{
    Aggregator, DatasetLoader, DefaultAggregator, ExportArtifact, ExportOptions, ExporterRegistry,
};
use crate::config::EngineConfig;
use crate::domain::{
    DatasetResult, Execution, ExecutionFilter, ExecutionStatus, ExportFormat, FilterSpec,
    Parameters, ReportDefinition, ReportResult, ResultStatus,
};
use crate::error::{CoreResult, ReportError};
use crate::events::{EventBus, ReportEvent};
use crate::logging::OpTimer;
use crate::store::{tables, DurableStore, Repository};

/// Named hook run around generation.
///
/// Hooks are registered on the engine by name and referenced from
/// [`crate::domain::ReportTriggers`]. A failing hook fails the execution.
#[async_trait]
pub trait ReportHook: Send + Sync {
    async fn before_generate(
        &self,
        _report: &ReportDefinition,
        _parameters: &Parameters,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_generate(
        &self,
        _report: &ReportDefinition,
        _result: &mut ReportResult,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Per-call generation options.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Return a live cached result when one exists.
    pub use_cache: bool,
    /// Store the result after a successful run.
    pub cache: bool,
    /// TTL for the stored result. Falls back to the engine default.
    pub cache_ttl: Option<Duration>,
    /// Row filters added to the report's global filters for this run only.
    /// Runs with extra filters bypass the cache.
    pub extra_filters: Vec<FilterSpec>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            cache: true,
            cache_ttl: None,
            extra_filters: Vec::new(),
        }
    }
}

impl GenerateOptions {
    /// Always run the pipeline, still caching the outcome.
    #[must_use]
    pub fn fresh() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Vec<FilterSpec>) -> Self {
        self.extra_filters = filters;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    fn cacheable(&self) -> bool {
        self.extra_filters.is_empty()
    }
}

/// Engine counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub reports: usize,
    pub executions: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub cache: CacheStats,
}

#[derive(Default)]
struct ExecutionTable {
    by_id: HashMap<String, Execution>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

struct EngineInner {
    reports: Repository<ReportDefinition>,
    execution_log: Repository<Execution>,
    executions: RwLock<ExecutionTable>,
    cache: ResultCache,
    loader: Arc<dyn DatasetLoader>,
    aggregator: RwLock<Arc<dyn Aggregator>>,
    exporters: ExporterRegistry,
    hooks: RwLock<HashMap<String, Arc<dyn ReportHook>>>,
    clock: SharedClock,
    bus: EventBus,
    max_retained: usize,
}

/// Report registry, generation pipeline, execution tracking and result cache.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("reports", &self.inner.reports.cached_len())
            .field("executions", &self.inner.executions.read().by_id.len())
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn DurableStore>,
        loader: Arc<dyn DatasetLoader>,
        clock: SharedClock,
        bus: EventBus,
        config: &EngineConfig,
    ) -> Self {
        let cache = ResultCache::new(
            Arc::clone(&clock),
            Duration::from_secs(config.default_cache_ttl_secs),
        );

        Self {
            inner: Arc::new(EngineInner {
                reports: Repository::new(tables::REPORTS, Arc::clone(&store)),
                execution_log: Repository::unmirrored(tables::EXECUTIONS, store),
                executions: RwLock::new(ExecutionTable::default()),
                cache,
                loader,
                aggregator: RwLock::new(Arc::new(DefaultAggregator)),
                exporters: ExporterRegistry::with_defaults(),
                hooks: RwLock::new(HashMap::new()),
                clock,
                bus,
                max_retained: config.max_retained_executions.max(1),
            }),
        }
    }

    /// Load persisted reports and close out executions left running by a
    /// previous process.
    pub async fn init(&self) -> CoreResult<usize> {
        let reports = self.inner.reports.load_all().await?;

        let now = self.now();
        for mut execution in self
            .inner
            .execution_log
            .find_by("status", ExecutionStatus::Running.as_str())
            .await?
        {
            execution.fail("interrupted by restart", now);
            self.inner.execution_log.save(&execution).await?;
            tracing::warn!(execution_id = %execution.id, "Marked interrupted execution as failed");
        }

        tracing::info!(reports = reports.len(), "Execution engine initialized");
        Ok(reports.len())
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn emit(&self, event: &ReportEvent) {
        self.inner.bus.emit(event);
    }

    /// Exporter registry, for registering additional formats.
    #[must_use]
    pub fn exporters(&self) -> &ExporterRegistry {
        &self.inner.exporters
    }

    /// Replace the aggregator.
    pub fn set_aggregator(&self, aggregator: Arc<dyn Aggregator>) {
        *self.inner.aggregator.write() = aggregator;
    }

    /// Register a named hook for report triggers.
    pub fn register_hook(&self, name: impl Into<String>, hook: Arc<dyn ReportHook>) {
        self.inner.hooks.write().insert(name.into(), hook);
    }

    fn hook(&self, name: &str) -> CoreResult<Arc<dyn ReportHook>> {
        self.inner
            .hooks
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ReportError::execution(format!("hook '{name}' is not registered")))
    }

    // ========================================================================
    // Report registry
    // ========================================================================

    /// Validate, stamp and persist a new definition. Returns its id.
    pub async fn register_report(&self, mut definition: ReportDefinition) -> CoreResult<String> {
        definition.validate()?;

        if definition.id.is_empty() {
            definition.id = Uuid::new_v4().to_string();
        } else if self.inner.reports.get(&definition.id).await?.is_some() {
            return Err(ReportError::validation(format!(
                "report '{}' already exists",
                definition.id
            )));
        }

        let now = self.now();
        definition.version = 1;
        definition.created_at = now;
        definition.updated_at = now;
        self.inner.reports.save(&definition).await?;

        tracing::info!(report_id = %definition.id, name = %definition.name, "Report registered");
        self.emit(&ReportEvent::ReportRegistered {
            report_id: definition.id.clone(),
            name: definition.name.clone(),
        });
        Ok(definition.id)
    }

    pub async fn get_report(&self, id: &str) -> CoreResult<Option<ReportDefinition>> {
        self.inner.reports.get(id).await
    }

    /// Like [`Self::get_report`] but unknown ids are an error.
    pub async fn require_report(&self, id: &str) -> CoreResult<ReportDefinition> {
        self.get_report(id)
            .await?
            .ok_or_else(|| ReportError::not_found("report", id))
    }

    /// All registered reports, oldest first.
    #[must_use]
    pub fn list_reports(&self) -> Vec<ReportDefinition> {
        let mut reports = self.inner.reports.cached();
        reports.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        reports
    }

    /// Replace a definition, keeping its id and creation time and bumping the
    /// version. Cached results of the report are dropped.
    pub async fn update_report(
        &self,
        id: &str,
        mut definition: ReportDefinition,
    ) -> CoreResult<ReportDefinition> {
        let existing = self.require_report(id).await?;
        definition.validate()?;

        definition.id = existing.id;
        definition.created_at = existing.created_at;
        definition.version = existing.version + 1;
        definition.updated_at = self.now();
        self.inner.reports.save(&definition).await?;

        let dropped = self.inner.cache.invalidate_report(id);
        tracing::info!(report_id = %id, version = definition.version, dropped, "Report updated");
        self.emit(&ReportEvent::ReportUpdated {
            report_id: id.to_string(),
            version: definition.version,
        });
        Ok(definition)
    }

    /// Remove a definition and its cached results.
    pub async fn delete_report(&self, id: &str) -> CoreResult<()> {
        self.require_report(id).await?;
        self.inner.reports.delete(id).await?;
        self.inner.cache.invalidate_report(id);

        tracing::info!(report_id = %id, "Report deleted");
        self.emit(&ReportEvent::ReportDeleted {
            report_id: id.to_string(),
        });
        Ok(())
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Generate a report, serving from the cache when allowed.
    pub async fn generate_report(
        &self,
        report_id: &str,
        parameters: &Parameters,
        options: &GenerateOptions,
    ) -> CoreResult<ReportResult> {
        let report = self.require_report(report_id).await?;
        let bound = bind_parameters(&report.parameters, parameters)?;

        if options.use_cache && options.cacheable() {
            if let Some(hit) = self.inner.cache.get(&report.id, &bound) {
                tracing::debug!(report_id = %report.id, result_id = %hit.id, "Cache hit");
                return Ok(hit);
            }
        }

        let execution_id = self.start_execution(&report, &bound).await?;
        self.run_execution(report, bound, execution_id, options.clone())
            .await
    }

    /// Start a generation in the background and return its execution id.
    ///
    /// Validation happens before returning; pipeline failures are recorded on
    /// the execution and logged.
    pub async fn execute_async(&self, report_id: &str, parameters: &Parameters) -> CoreResult<String> {
        let report = self.require_report(report_id).await?;
        let bound = bind_parameters(&report.parameters, parameters)?;
        let execution_id = self.start_execution(&report, &bound).await?;

        let engine = self.clone();
        let id = execution_id.clone();
        tokio::spawn(async move {
            if let Err(e) = engine
                .run_execution(report, bound, id.clone(), GenerateOptions::fresh())
                .await
            {
                tracing::warn!(execution_id = %id, error = %e, "Background execution did not complete");
            }
        });

        Ok(execution_id)
    }

    async fn start_execution(&self, report: &ReportDefinition, parameters: &Parameters) -> CoreResult<String> {
        let now = self.now();
        let execution = Execution::new(&report.id, parameters.clone(), now);
        let id = execution.id.clone();

        self.inner.execution_log.save(&execution).await?;
        {
            let mut table = self.inner.executions.write();
            table.order.push_back(id.clone());
            table.by_id.insert(id.clone(), execution);
        }

        tracing::info!(execution_id = %id, report_id = %report.id, "Execution started");
        self.emit(&ReportEvent::ExecutionStarted {
            execution_id: id.clone(),
            report_id: report.id.clone(),
            timestamp: now,
        });
        Ok(id)
    }

    async fn run_execution(
        &self,
        report: ReportDefinition,
        parameters: Parameters,
        execution_id: String,
        options: GenerateOptions,
    ) -> CoreResult<ReportResult> {
        let timer = OpTimer::new("engine", "generate");
        let outcome = self
            .run_stages(&report, &parameters, &execution_id, &options, &timer)
            .await;
        let now = self.now();

        match outcome {
            Ok(result) => {
                let stored = result.clone();
                let completed = self
                    .finish_execution(&execution_id, move |e| e.complete(stored, now))
                    .await?;
                if !completed {
                    timer.finish();
                    return Err(ReportError::Cancelled { execution_id });
                }

                if options.cache && options.cacheable() {
                    self.inner
                        .cache
                        .put(&report.id, &parameters, result.clone(), options.cache_ttl);
                }

                let duration_ms = timer.finish_with_result::<_, ReportError>(Ok(&result));
                self.emit(&ReportEvent::ExecutionCompleted {
                    execution_id,
                    report_id: report.id,
                    row_count: result.row_count,
                    duration_ms,
                });
                Ok(result)
            }
            Err(err @ ReportError::Cancelled { .. }) => {
                timer.finish();
                tracing::info!(execution_id = %execution_id, "Execution stopped after cancellation");
                Err(err)
            }
            Err(err) => {
                let message = err.to_string();
                let failed = self
                    .finish_execution(&execution_id, |e| e.fail(message.clone(), now))
                    .await?;
                timer.finish_with_result::<(), _>(Err(&err));

                if failed {
                    self.emit(&ReportEvent::ExecutionFailed {
                        execution_id,
                        report_id: report.id,
                        error: message,
                    });
                    Err(err)
                } else {
                    Err(ReportError::Cancelled { execution_id })
                }
            }
        }
    }

    async fn run_stages(
        &self,
        report: &ReportDefinition,
        parameters: &Parameters,
        execution_id: &str,
        options: &GenerateOptions,
        timer: &OpTimer,
    ) -> CoreResult<ReportResult> {
        if let Some(name) = &report.triggers.before_generate {
            self.hook(name)?
                .before_generate(report, parameters)
                .await
                .map_err(|e| ReportError::execution(format!("before-generate hook '{name}' failed: {e:#}")))?;
        }
        self.checkpoint(execution_id, 0)?;

        // Load
        let mut datasets = BTreeMap::new();
        for spec in &report.datasets {
            let rows = self
                .inner
                .loader
                .load(spec, parameters)
                .await
                .map_err(|e| ReportError::execution(format!("failed to load dataset '{}': {e:#}", spec.name)))?;
            self.checkpoint(execution_id, 0)?;

            tracing::debug!(execution_id, dataset = %spec.name, rows = rows.len(), "Dataset loaded");
            self.emit(&ReportEvent::DatasetLoaded {
                execution_id: execution_id.to_string(),
                report_id: report.id.clone(),
                dataset: spec.name.clone(),
                row_count: rows.len(),
            });
            datasets.insert(spec.name.clone(), DatasetResult::from_rows(rows));
        }
        self.checkpoint(execution_id, 30)?;

        // Filter
        let filters: Vec<FilterSpec> = report
            .filters
            .iter()
            .chain(&options.extra_filters)
            .map(|f| f.bind(parameters))
            .collect();
        pipeline::apply_filters(&mut datasets, &filters);
        self.checkpoint(execution_id, 50)?;

        // Aggregate
        let aggregator = Arc::clone(&*self.inner.aggregator.read());
        for spec in &report.datasets {
            let (Some(aggregation), Some(dataset)) = (&spec.aggregation, datasets.get_mut(&spec.name)) else {
                continue;
            };
            pipeline::aggregate(dataset, aggregation, aggregator.as_ref())
                .map_err(|e| ReportError::execution(format!("aggregation of '{}' failed: {e:#}", spec.name)))?;
        }
        self.checkpoint(execution_id, 70)?;

        // Sort
        pipeline::apply_sorts(&mut datasets, &report.sorts);
        self.checkpoint(execution_id, 80)?;

        // Visualize
        let visualizations = pipeline::build_visualizations(&report.visualizations, &datasets);
        self.checkpoint(execution_id, 90)?;

        let mut result = ReportResult {
            id: Uuid::new_v4().to_string(),
            report_id: report.id.clone(),
            report_name: report.name.clone(),
            execution_id: Some(execution_id.to_string()),
            generated_at: self.now(),
            execution_time_ms: timer.elapsed_ms(),
            parameters: parameters.clone(),
            datasets,
            visualizations,
            row_count: 0,
            status: ResultStatus::Success,
        };
        result.recount();

        if let Some(name) = &report.triggers.after_generate {
            self.hook(name)?
                .after_generate(report, &mut result)
                .await
                .map_err(|e| ReportError::execution(format!("after-generate hook '{name}' failed: {e:#}")))?;
            result.recount();
        }
        self.checkpoint(execution_id, 90)?;

        Ok(result)
    }

    /// Advance progress, or stop if the execution was cancelled.
    fn checkpoint(&self, execution_id: &str, progress: u8) -> CoreResult<()> {
        let mut table = self.inner.executions.write();
        match table.by_id.get_mut(execution_id) {
            Some(execution) if execution.status == ExecutionStatus::Cancelled => Err(ReportError::Cancelled {
                execution_id: execution_id.to_string(),
            }),
            Some(execution) => {
                execution.advance(progress);
                Ok(())
            }
            None => Err(ReportError::not_found("execution", execution_id)),
        }
    }

    /// Apply a terminal transition, persist it and enforce retention.
    async fn finish_execution<F>(&self, execution_id: &str, transition: F) -> CoreResult<bool>
    where
        F: FnOnce(&mut Execution) -> bool,
    {
        let snapshot = {
            let mut table = self.inner.executions.write();
            let Some(execution) = table.by_id.get_mut(execution_id) else {
                return Ok(false);
            };
            if !transition(execution) {
                return Ok(false);
            }
            execution.clone()
        };

        self.inner.execution_log.save(&snapshot).await?;
        self.enforce_retention();
        Ok(true)
    }

    /// Drop the oldest terminal executions beyond the retention cap.
    fn enforce_retention(&self) {
        let mut table = self.inner.executions.write();
        let mut excess = table.by_id.len().saturating_sub(self.inner.max_retained);
        if excess == 0 {
            return;
        }

        let ExecutionTable { by_id, order } = &mut *table;
        order.retain(|id| {
            if excess > 0 && by_id.get(id).is_some_and(Execution::is_terminal) {
                by_id.remove(id);
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    // ========================================================================
    // Execution tracking
    // ========================================================================

    /// Cancel a running execution. Returns whether its status changed.
    pub async fn cancel_execution(&self, execution_id: &str) -> CoreResult<bool> {
        let now = self.now();
        let snapshot = {
            let mut table = self.inner.executions.write();
            match table.by_id.get_mut(execution_id) {
                Some(execution) => execution.cancel(now).then(|| execution.clone()),
                None => None,
            }
        };

        let Some(execution) = snapshot else {
            return if self.get_execution(execution_id).await?.is_some() {
                Ok(false)
            } else {
                Err(ReportError::not_found("execution", execution_id))
            };
        };

        self.inner.execution_log.save(&execution).await?;
        tracing::info!(execution_id, report_id = %execution.report_id, "Execution cancelled");
        self.emit(&ReportEvent::ExecutionCancelled {
            execution_id: execution.id,
            report_id: execution.report_id,
        });
        Ok(true)
    }

    /// Retained execution, falling back to the store.
    pub async fn get_execution(&self, execution_id: &str) -> CoreResult<Option<Execution>> {
        let retained = self.inner.executions.read().by_id.get(execution_id).cloned();
        if retained.is_some() {
            return Ok(retained);
        }
        self.inner.execution_log.get(execution_id).await
    }

    /// Retained executions matching the filter, newest first.
    #[must_use]
    pub fn get_executions(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        let table = self.inner.executions.read();
        let mut executions: Vec<Execution> = table
            .order
            .iter()
            .rev()
            .filter_map(|id| table.by_id.get(id))
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            executions.truncate(limit);
        }
        executions
    }

    // ========================================================================
    // Export, cache, stats
    // ========================================================================

    /// Serialise a result through the registered exporter.
    pub async fn export_report(
        &self,
        result: &ReportResult,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> CoreResult<ExportArtifact> {
        self.inner.exporters.export(result, format, options).await
    }

    /// Export to several formats. The first failure aborts.
    pub async fn export_to_multiple(
        &self,
        result: &ReportResult,
        formats: &[ExportFormat],
        options: &ExportOptions,
    ) -> CoreResult<BTreeMap<ExportFormat, ExportArtifact>> {
        let mut artifacts = BTreeMap::new();
        for format in formats {
            let artifact = self.export_report(result, *format, options).await?;
            artifacts.insert(*format, artifact);
        }
        Ok(artifacts)
    }

    /// Drop cached results of one report, or all of them.
    pub fn clear_cache(&self, report_id: Option<&str>) -> usize {
        match report_id {
            Some(id) => self.inner.cache.invalidate_report(id),
            None => self.inner.cache.clear(),
        }
    }

    #[must_use]
    pub fn get_stats(&self) -> EngineStats {
        let table = self.inner.executions.read();
        let count = |status: ExecutionStatus| table.by_id.values().filter(|e| e.status == status).count();

        EngineStats {
            reports: self.inner.reports.cached_len(),
            executions: table.by_id.len(),
            running: count(ExecutionStatus::Running),
            completed: count(ExecutionStatus::Completed),
            failed: count(ExecutionStatus::Failed),
            cancelled: count(ExecutionStatus::Cancelled),
            cache: self.inner.cache.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::collaborators::InMemoryDatasetLoader;
    use crate::domain::{DatasetSpec, ParameterDecl, ParameterType, ReportTriggers};
    use crate::store::InMemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn engine() -> ExecutionEngine {
        engine_with(EngineConfig::default())
    }

    fn engine_with(config: EngineConfig) -> ExecutionEngine {
        let rows = [json!({"id": 1, "amount": 5}), json!({"id": 2, "amount": 7})]
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        let loader = InMemoryDatasetLoader::new().with_table("sales", rows);
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        ExecutionEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(loader),
            Arc::new(clock),
            EventBus::new(),
            &config,
        )
    }

    fn definition() -> ReportDefinition {
        ReportDefinition::new("Sales").with_dataset(DatasetSpec::new("sales", "sales", ["*"]))
    }

    #[tokio::test]
    async fn test_register_assigns_id_and_version() {
        let engine = engine();
        let id = engine.register_report(definition()).await.unwrap();
        let stored = engine.get_report(&id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(!stored.id.is_empty());
        assert_eq!(engine.list_reports().len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_definition() {
        let engine = engine();
        let err = engine
            .register_report(ReportDefinition::new("Empty"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(engine.list_reports().is_empty());
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_drops_cache() {
        let engine = engine();
        let id = engine.register_report(definition()).await.unwrap();
        engine
            .generate_report(&id, &Parameters::new(), &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(engine.get_stats().cache.total_entries, 1);

        let updated = engine
            .update_report(&id, definition().with_id("ignored"))
            .await
            .unwrap();
        assert_eq!(updated.id, id);
        assert_eq!(updated.version, 2);
        assert_eq!(engine.get_stats().cache.total_entries, 0);
    }

    #[tokio::test]
    async fn test_unknown_report_is_not_found() {
        let engine = engine();
        let err = engine
            .generate_report("missing", &Parameters::new(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(engine.delete_report("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_required_parameter_fails_before_execution() {
        let engine = engine();
        let id = engine
            .register_report(
                definition().with_parameter(ParameterDecl::new("year", ParameterType::Integer).required()),
            )
            .await
            .unwrap();

        let err = engine
            .generate_report(&id, &Parameters::new(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(engine.get_stats().executions, 0);
    }

    #[tokio::test]
    async fn test_unregistered_hook_fails_execution() {
        let engine = engine();
        let mut def = definition();
        def.triggers = ReportTriggers {
            before_generate: Some("audit".into()),
            after_generate: None,
        };
        let id = engine.register_report(def).await.unwrap();

        let err = engine
            .generate_report(&id, &Parameters::new(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Execution(_)));

        let failed = engine.get_executions(&ExecutionFilter::default().with_status(ExecutionStatus::Failed));
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().unwrap().contains("audit"));
    }

    #[tokio::test]
    async fn test_after_hook_can_annotate_result() {
        struct Truncate;

        #[async_trait]
        impl ReportHook for Truncate {
            async fn after_generate(
                &self,
                _report: &ReportDefinition,
                result: &mut ReportResult,
            ) -> anyhow::Result<()> {
                for dataset in result.datasets.values_mut() {
                    let mut rows = std::mem::take(&mut dataset.rows);
                    rows.truncate(1);
                    dataset.set_rows(rows);
                }
                Ok(())
            }
        }

        let engine = engine();
        engine.register_hook("truncate", Arc::new(Truncate));
        let mut def = definition();
        def.triggers.after_generate = Some("truncate".into());
        let id = engine.register_report(def).await.unwrap();

        let result = engine
            .generate_report(&id, &Parameters::new(), &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
    }

    #[tokio::test]
    async fn test_retention_drops_oldest_terminal_executions() {
        let engine = engine_with(EngineConfig {
            max_retained_executions: 2,
            ..EngineConfig::default()
        });
        let id = engine.register_report(definition()).await.unwrap();
        for _ in 0..4 {
            engine
                .generate_report(&id, &Parameters::new(), &GenerateOptions::fresh())
                .await
                .unwrap();
        }
        assert_eq!(engine.get_stats().executions, 2);
    }

    #[tokio::test]
    async fn test_export_to_multiple() {
        let engine = engine();
        let id = engine.register_report(definition()).await.unwrap();
        let result = engine
            .generate_report(&id, &Parameters::new(), &GenerateOptions::default())
            .await
            .unwrap();

        let artifacts = engine
            .export_to_multiple(
                &result,
                &[ExportFormat::Json, ExportFormat::Csv],
                &ExportOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(artifacts.len(), 2);

        let err = engine
            .export_to_multiple(
                &result,
                &[ExportFormat::Csv, ExportFormat::Pdf],
                &ExportOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Execution(_)));
    }
}
