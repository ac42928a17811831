//! Subscription management and the delivery queue.
//!
//! ```text
//! sweep (next_delivery ≤ now) ─┐
//! deliver_now(id) ─────────────┴─▶ queue (FIFO) ──one drainer──▶ generate → export → channel
//!                                                                      │
//!                                       SubscriptionDelivery row ◀─────┘
//! ```
//!
//! Every attempt, successful or not, recomputes `next_delivery`. There is no
//! retry beyond the next scheduled delivery; repeated failures show up in
//! `error_count` and the delivery history.
//!
//! Subscription writes hold one async lock. A delivery releases it while the
//! report is generated and sent, then applies its outcome to a fresh read, so
//! edits made meanwhile survive.

pub mod queue;

pub use queue::{DeliveryQueue, DrainGuard};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::collaborators::{ChannelRegistry, DeliveryPayload, ExportOptions};
use crate::config::DeliverySettings;
use crate::domain::{
    DeliveryConfig, NewSubscription, Subscription, SubscriptionDelivery, SubscriptionPatch,
};
use crate::engine::{ExecutionEngine, GenerateOptions};
use crate::error::{CoreResult, ReportError};
use crate::events::{EventBus, ReportEvent};
use crate::logging::OpTimer;
use crate::scheduler::{calculate_next_run, validate_schedule, CronEvaluator};
use crate::store::{tables, DurableStore, Repository};

/// Subscription counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub total: usize,
    pub enabled: usize,
    pub expired: usize,
    pub queued: usize,
    pub draining: bool,
    /// Successful deliveries across all subscriptions.
    pub delivered: u64,
    /// Failed deliveries across all subscriptions.
    pub errors: u64,
    pub history_rows: usize,
}

struct DeliveryInner {
    subscriptions: Repository<Subscription>,
    deliveries: Repository<SubscriptionDelivery>,
    engine: ExecutionEngine,
    channels: ChannelRegistry,
    cron: Arc<dyn CronEvaluator>,
    clock: SharedClock,
    bus: EventBus,
    queue: DeliveryQueue,
    /// Serialises read-modify-write of subscription records.
    writes: tokio::sync::Mutex<()>,
    sweep_interval: Duration,
    drain_interval: Duration,
}

/// Subscriptions and their delivery queue.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<DeliveryInner>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &self.inner.subscriptions.cached_len())
            .field("queued", &self.inner.queue.len())
            .field("draining", &self.inner.queue.is_draining())
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<dyn DurableStore>,
        engine: ExecutionEngine,
        channels: ChannelRegistry,
        cron: Arc<dyn CronEvaluator>,
        clock: SharedClock,
        bus: EventBus,
        config: &DeliverySettings,
    ) -> Self {
        Self {
            inner: Arc::new(DeliveryInner {
                subscriptions: Repository::new(tables::SUBSCRIPTIONS, Arc::clone(&store)),
                deliveries: Repository::unmirrored(tables::SUBSCRIPTION_DELIVERIES, store),
                engine,
                channels,
                cron,
                clock,
                bus,
                queue: DeliveryQueue::new(),
                writes: tokio::sync::Mutex::new(()),
                sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
                drain_interval: Duration::from_millis(config.drain_interval_ms.max(1)),
            }),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Channel registry used for dispatch.
    #[must_use]
    pub fn channels(&self) -> &ChannelRegistry {
        &self.inner.channels
    }

    /// Reload persisted subscriptions. Enabled ones missing a
    /// `next_delivery` get one computed.
    pub async fn init(&self) -> CoreResult<usize> {
        let _writes = self.inner.writes.lock().await;
        let subscriptions = self.inner.subscriptions.load_all().await?;
        let now = self.now();

        for mut subscription in subscriptions
            .iter()
            .filter(|s| s.enabled && s.next_delivery.is_none())
            .cloned()
        {
            let last = subscription.last_delivery;
            self.reschedule(&mut subscription, now, last);
            self.inner.subscriptions.save(&subscription).await?;
        }

        tracing::info!(subscriptions = subscriptions.len(), "Subscription manager initialized");
        Ok(subscriptions.len())
    }

    /// Set `next_delivery` from `now`, disabling the subscription when its
    /// schedule is exhausted.
    fn reschedule(&self, subscription: &mut Subscription, now: DateTime<Utc>, last: Option<DateTime<Utc>>) {
        match calculate_next_run(&subscription.schedule, now, last, self.inner.cron.as_ref()) {
            Ok(Some(next)) => {
                subscription.next_delivery = Some(next);
                subscription.updated_at = now;
            }
            Ok(None) => subscription.disable(now),
            Err(e) => {
                tracing::warn!(subscription_id = %subscription.id, error = %e, "Disabling subscription with unusable schedule");
                subscription.disable(now);
            }
        }
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// Validate and persist a subscription.
    pub async fn create_subscription(&self, input: NewSubscription) -> CoreResult<Subscription> {
        self.inner.engine.require_report(&input.report_id).await?;
        if input.name.trim().is_empty() {
            return Err(ReportError::validation("subscription name is required"));
        }
        if input.user_id.trim().is_empty() {
            return Err(ReportError::validation("subscription user is required"));
        }
        input.delivery.validate()?;
        validate_schedule(&input.schedule, self.inner.cron.as_ref())?;

        let now = self.now();
        let next_delivery = if input.enabled {
            calculate_next_run(&input.schedule, now, None, self.inner.cron.as_ref())?
        } else {
            None
        };

        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            report_id: input.report_id,
            user_id: input.user_id,
            schedule: input.schedule,
            parameters: input.parameters,
            format: input.format,
            delivery: input.delivery,
            filters: input.filters,
            enabled: next_delivery.is_some(),
            next_delivery,
            last_delivery: None,
            delivery_count: 0,
            error_count: 0,
            expires_at: input.expires_at,
            created_at: now,
            updated_at: now,
        };
        self.inner.subscriptions.save(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            report_id = %subscription.report_id,
            user_id = %subscription.user_id,
            channel = subscription.delivery.channel_name(),
            "Subscription created"
        );
        self.inner.bus.emit(&ReportEvent::SubscriptionCreated {
            subscription_id: subscription.id.clone(),
            report_id: subscription.report_id.clone(),
        });
        Ok(subscription)
    }

    async fn require(&self, id: &str) -> CoreResult<Subscription> {
        self.inner
            .subscriptions
            .get(id)
            .await?
            .ok_or_else(|| ReportError::not_found("subscription", id))
    }

    /// Apply a partial update. A new schedule recomputes `next_delivery`.
    pub async fn update_subscription(&self, id: &str, patch: SubscriptionPatch) -> CoreResult<Subscription> {
        let _writes = self.inner.writes.lock().await;
        let mut subscription = self.require(id).await?;
        let now = self.now();

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(ReportError::validation("subscription name is required"));
            }
            subscription.name = name;
        }
        if let Some(delivery) = patch.delivery {
            delivery.validate()?;
            subscription.delivery = delivery;
        }
        let schedule_changed = patch.schedule.is_some();
        if let Some(schedule) = patch.schedule {
            validate_schedule(&schedule, self.inner.cron.as_ref())?;
            subscription.schedule = schedule;
        }
        if let Some(parameters) = patch.parameters {
            subscription.parameters = parameters;
        }
        if let Some(format) = patch.format {
            subscription.format = format;
        }
        if let Some(filters) = patch.filters {
            subscription.filters = filters;
        }
        if let Some(expires_at) = patch.expires_at {
            subscription.expires_at = Some(expires_at);
        }

        subscription.updated_at = now;
        if schedule_changed && subscription.enabled {
            self.reschedule(&mut subscription, now, None);
        }
        self.inner.subscriptions.save(&subscription).await?;

        tracing::info!(subscription_id = %id, "Subscription updated");
        Ok(subscription)
    }

    /// Remove a subscription and any queued delivery of it. History is kept.
    pub async fn delete_subscription(&self, id: &str) -> CoreResult<()> {
        let _writes = self.inner.writes.lock().await;
        self.require(id).await?;
        self.inner.subscriptions.delete(id).await?;
        let dequeued = self.inner.queue.remove(id);

        tracing::info!(subscription_id = %id, dequeued, "Subscription deleted");
        Ok(())
    }

    /// Enable and recompute `next_delivery` from now.
    pub async fn enable_subscription(&self, id: &str) -> CoreResult<Subscription> {
        let _writes = self.inner.writes.lock().await;
        let mut subscription = self.require(id).await?;
        let now = self.now();
        subscription.enabled = true;
        let last = subscription.last_delivery;
        self.reschedule(&mut subscription, now, last);
        self.inner.subscriptions.save(&subscription).await?;

        tracing::info!(subscription_id = %id, next_delivery = ?subscription.next_delivery, "Subscription enabled");
        Ok(subscription)
    }

    /// Disable and clear `next_delivery`.
    pub async fn disable_subscription(&self, id: &str) -> CoreResult<Subscription> {
        let _writes = self.inner.writes.lock().await;
        let mut subscription = self.require(id).await?;
        subscription.disable(self.now());
        self.inner.subscriptions.save(&subscription).await?;

        tracing::info!(subscription_id = %id, "Subscription disabled");
        Ok(subscription)
    }

    pub async fn get_subscription(&self, id: &str) -> CoreResult<Option<Subscription>> {
        self.inner.subscriptions.get(id).await
    }

    /// Subscriptions of one user, oldest first.
    #[must_use]
    pub fn get_user_subscriptions(&self, user_id: &str) -> Vec<Subscription> {
        let mut subscriptions: Vec<_> = self
            .list_subscriptions()
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .collect();
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        subscriptions
    }

    /// All subscriptions, oldest first.
    #[must_use]
    pub fn list_subscriptions(&self) -> Vec<Subscription> {
        let mut subscriptions = self.inner.subscriptions.cached();
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        subscriptions
    }

    /// Delivery attempts of a subscription, newest first.
    pub async fn get_delivery_history(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> CoreResult<Vec<SubscriptionDelivery>> {
        let mut history = self.inner.deliveries.find_by("subscription_id", id).await?;
        history.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = limit {
            history.truncate(limit);
        }
        Ok(history)
    }

    pub async fn get_subscription_stats(&self) -> CoreResult<SubscriptionStats> {
        let now = self.now();
        let subscriptions = self.inner.subscriptions.cached();
        Ok(SubscriptionStats {
            total: subscriptions.len(),
            enabled: subscriptions.iter().filter(|s| s.enabled).count(),
            expired: subscriptions.iter().filter(|s| s.is_expired(now)).count(),
            queued: self.inner.queue.len(),
            draining: self.inner.queue.is_draining(),
            delivered: subscriptions.iter().map(|s| s.delivery_count).sum(),
            errors: subscriptions.iter().map(|s| s.error_count).sum(),
            history_rows: self.inner.deliveries.count().await?,
        })
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Queue a delivery and drain the queue.
    ///
    /// When another drain is already running this returns right after
    /// queueing; the running drain delivers the id.
    pub async fn deliver_now(&self, id: &str) -> CoreResult<()> {
        self.require(id).await?;
        let queue_length = self.inner.queue.push(id);

        tracing::debug!(subscription_id = %id, queue_length, "Delivery queued");
        self.inner.bus.emit(&ReportEvent::DeliveryQueued {
            subscription_id: id.to_string(),
            queue_length,
        });

        self.drain().await;
        Ok(())
    }

    /// Deliver queued ids until the queue is empty. Returns the number of ids
    /// taken off the queue, or 0 when another drain holds the guard.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        loop {
            let Some(guard) = self.inner.queue.try_drain() else {
                return processed;
            };
            while let Some(id) = guard.take_next() {
                processed += 1;
                if let Err(e) = self.process(&id).await {
                    tracing::error!(subscription_id = %id, error = %e, "Delivery bookkeeping failed");
                }
            }
            drop(guard);

            if self.inner.queue.is_empty() {
                return processed;
            }
        }
    }

    /// One drain step.
    ///
    /// The outcome is merged into the subscription as it stands after the
    /// send. A subscription deleted meanwhile keeps only its history row; one
    /// disabled meanwhile gets its counters but stays disabled.
    async fn process(&self, id: &str) -> CoreResult<Option<SubscriptionDelivery>> {
        let (subscription, mut delivery) = {
            let _writes = self.inner.writes.lock().await;
            let Some(mut subscription) = self.inner.subscriptions.get(id).await? else {
                tracing::debug!(subscription_id = %id, "Skipping delivery of removed subscription");
                return Ok(None);
            };

            let now = self.now();
            if !subscription.enabled {
                tracing::debug!(subscription_id = %id, "Skipping delivery of disabled subscription");
                return Ok(None);
            }
            if subscription.is_expired(now) {
                subscription.disable(now);
                self.inner.subscriptions.save(&subscription).await?;
                tracing::info!(subscription_id = %id, "Subscription expired and was disabled");
                return Ok(None);
            }

            let report_name = self
                .inner
                .engine
                .get_report(&subscription.report_id)
                .await?
                .map_or_else(|| subscription.report_id.clone(), |report| report.name);

            let delivery = SubscriptionDelivery::start(&subscription, report_name, now);
            self.inner.deliveries.save(&delivery).await?;
            (subscription, delivery)
        };
        self.inner.bus.emit(&ReportEvent::DeliveryStarted {
            subscription_id: id.to_string(),
            delivery_id: delivery.id.clone(),
        });

        let timer = OpTimer::new("delivery", "deliver");
        let outcome = self.send(&subscription).await;
        timer.finish_with_result(outcome.as_ref());

        let _writes = self.inner.writes.lock().await;
        let finished = self.now();
        let (event, delivered) = match outcome {
            Ok((size, location)) => {
                delivery.succeed(size, &location, finished);
                let event = ReportEvent::DeliveryCompleted {
                    subscription_id: id.to_string(),
                    delivery_id: delivery.id.clone(),
                    location,
                };
                (event, true)
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(subscription_id = %id, error = %error, "Delivery failed");
                delivery.fail(error.clone(), finished);
                let event = ReportEvent::DeliveryFailed {
                    subscription_id: id.to_string(),
                    delivery_id: delivery.id.clone(),
                    error,
                };
                (event, false)
            }
        };
        self.inner.deliveries.save(&delivery).await?;

        match self.inner.subscriptions.get(id).await? {
            Some(mut current) => {
                if delivered {
                    current.delivery_count += 1;
                    current.last_delivery = Some(finished);
                } else {
                    current.error_count += 1;
                }
                current.updated_at = finished;
                // Any attempt counts as a run, so one-time subscriptions never repeat.
                if current.enabled {
                    self.reschedule(&mut current, finished, Some(delivery.started_at));
                }
                self.inner.subscriptions.save(&current).await?;
            }
            None => {
                tracing::debug!(subscription_id = %id, "Subscription removed during delivery; keeping history only");
            }
        }

        self.inner.bus.emit(&event);
        Ok(Some(delivery))
    }

    /// Generate, export and dispatch. Returns the artifact size and location.
    async fn send(&self, subscription: &Subscription) -> CoreResult<(usize, String)> {
        let engine = &self.inner.engine;
        let options = GenerateOptions::default().with_filters(subscription.filters.clone());
        let result = engine
            .generate_report(&subscription.report_id, &subscription.parameters, &options)
            .await?;
        let artifact = engine
            .export_report(&result, subscription.format, &ExportOptions::default())
            .await?;
        let size = artifact.size();

        let subject = match &subscription.delivery {
            DeliveryConfig::Email {
                subject: Some(subject),
                ..
            } => subject.clone(),
            _ => format!("{}: {}", subscription.name, result.report_name),
        };
        let payload = DeliveryPayload::for_result(&result, artifact, subject);
        let location = self
            .inner
            .channels
            .dispatch(&subscription.delivery, &payload)
            .await?;
        Ok((size, location))
    }

    // ========================================================================
    // Background loops
    // ========================================================================

    /// Queue every due subscription. A failure on one never stops the rest.
    /// Returns the number queued.
    pub async fn run_due_deliveries(&self) -> usize {
        let now = self.now();
        let mut due: Vec<Subscription> = self
            .inner
            .subscriptions
            .cached()
            .into_iter()
            .filter(|s| s.is_due(now) && !self.inner.queue.contains(&s.id))
            .collect();
        due.sort_by(|a, b| a.next_delivery.cmp(&b.next_delivery));

        let mut queued = 0;
        for subscription in due {
            match self.deliver_now(&subscription.id).await {
                Ok(()) => queued += 1,
                Err(e) => {
                    tracing::warn!(subscription_id = %subscription.id, error = %e, "Could not queue due delivery");
                }
            }
        }
        queued
    }

    /// Spawn the subscription sweep and the periodic drain. Both stop when
    /// `shutdown` is cancelled.
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let sweep_period = self.inner.sweep_interval;
        let drain_period = self.inner.drain_interval;

        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_period);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut drain = tokio::time::interval(drain_period);
            drain.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(
                sweep_secs = sweep_period.as_secs(),
                drain_ms = u64::try_from(drain_period.as_millis()).unwrap_or(u64::MAX),
                "Delivery loops started"
            );

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = sweep.tick() => {
                        let queued = manager.run_due_deliveries().await;
                        if queued > 0 {
                            tracing::debug!(queued, "Subscription sweep complete");
                        }
                    }
                    _ = drain.tick() => {
                        if !manager.inner.queue.is_empty() {
                            manager.drain().await;
                        }
                    }
                }
            }
            tracing::info!("Delivery loops stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::collaborators::InMemoryDatasetLoader;
    use crate::config::EngineConfig;
    use crate::domain::{DatasetSpec, ReportDefinition, ScheduleDefinition};
    use crate::scheduler::DefaultCronEvaluator;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    struct Fixture {
        manager: SubscriptionManager,
        clock: ManualClock,
        report_id: String,
        dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let rows = [json!({"region": "north"}), json!({"region": "south"})]
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        let store: Arc<dyn DurableStore> = Arc::new(InMemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        let bus = EventBus::new();
        let engine = ExecutionEngine::new(
            Arc::clone(&store),
            Arc::new(InMemoryDatasetLoader::new().with_table("sales", rows)),
            Arc::new(clock.clone()),
            bus.clone(),
            &EngineConfig::default(),
        );
        let report_id = engine
            .register_report(ReportDefinition::new("Sales").with_dataset(DatasetSpec::new("sales", "sales", ["*"])))
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let manager = SubscriptionManager::new(
            store,
            engine,
            ChannelRegistry::with_defaults(dir.path()),
            Arc::new(DefaultCronEvaluator),
            Arc::new(clock.clone()),
            bus,
            &DeliverySettings::default(),
        );
        Fixture {
            manager,
            clock,
            report_id,
            dir,
        }
    }

    fn to_dir(f: &Fixture) -> NewSubscription {
        NewSubscription::new(
            "Morning sales",
            &f.report_id,
            "user-1",
            ScheduleDefinition::daily("08:00"),
            DeliveryConfig::Filesystem {
                directory: f.dir.path().display().to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_create_computes_next_delivery() {
        let f = fixture().await;
        let sub = f.manager.create_subscription(to_dir(&f)).await.unwrap();
        assert!(sub.enabled);
        assert_eq!(sub.next_delivery, Some(Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap()));
        assert_eq!(f.manager.get_user_subscriptions("user-1").len(), 1);
        assert!(f.manager.get_user_subscriptions("user-2").is_empty());
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let f = fixture().await;
        let mut input = to_dir(&f);
        input.user_id = " ".into();
        assert!(f.manager.create_subscription(input).await.unwrap_err().is_validation());

        let mut input = to_dir(&f);
        input.report_id = "missing".into();
        assert!(f.manager.create_subscription(input).await.unwrap_err().is_not_found());
        assert!(f.manager.list_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_now_writes_file_and_counts() {
        let f = fixture().await;
        let sub = f.manager.create_subscription(to_dir(&f)).await.unwrap();
        f.manager.deliver_now(&sub.id).await.unwrap();

        let history = f.manager.get_delivery_history(&sub.id, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, crate::domain::DeliveryStatus::Success);
        let location = history[0].artifact_location.clone().unwrap();
        assert!(std::path::Path::new(&location).exists());

        let sub = f.manager.get_subscription(&sub.id).await.unwrap().unwrap();
        assert_eq!(sub.delivery_count, 1);
        assert_eq!(sub.last_delivery, Some(f.clock.now()));
    }

    #[tokio::test]
    async fn test_row_filters_apply_per_subscription() {
        let f = fixture().await;
        let input = to_dir(&f).with_filter(crate::domain::FilterSpec::eq("region", json!("north")));
        let sub = f.manager.create_subscription(input).await.unwrap();
        f.manager.deliver_now(&sub.id).await.unwrap();

        let history = f.manager.get_delivery_history(&sub.id, Some(1)).await.unwrap();
        let body = std::fs::read_to_string(history[0].artifact_location.as_deref().unwrap()).unwrap();
        assert!(body.contains("north"));
        assert!(!body.contains("south"));
    }

    #[tokio::test]
    async fn test_expired_subscription_is_disabled_on_drain() {
        let f = fixture().await;
        let mut input = to_dir(&f);
        input.expires_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let sub = f.manager.create_subscription(input).await.unwrap();

        f.clock.set(Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap());
        assert_eq!(f.manager.run_due_deliveries().await, 1);

        let sub = f.manager.get_subscription(&sub.id).await.unwrap().unwrap();
        assert!(!sub.enabled);
        assert!(sub.next_delivery.is_none());
        assert!(f.manager.get_delivery_history(&sub.id, None).await.unwrap().is_empty());
        assert_eq!(f.manager.get_subscription_stats().await.unwrap().expired, 1);
    }

    #[tokio::test]
    async fn test_disable_enable_and_delete() {
        let f = fixture().await;
        let sub = f.manager.create_subscription(to_dir(&f)).await.unwrap();

        let disabled = f.manager.disable_subscription(&sub.id).await.unwrap();
        assert!(disabled.next_delivery.is_none());

        f.clock.set(Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap());
        let enabled = f.manager.enable_subscription(&sub.id).await.unwrap();
        assert_eq!(enabled.next_delivery, Some(Utc.with_ymd_and_hms(2024, 1, 4, 8, 0, 0).unwrap()));

        f.manager.delete_subscription(&sub.id).await.unwrap();
        assert!(f.manager.get_subscription(&sub.id).await.unwrap().is_none());
        assert!(f.manager.deliver_now(&sub.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_replaces_schedule() {
        let f = fixture().await;
        let sub = f.manager.create_subscription(to_dir(&f)).await.unwrap();
        let patch = SubscriptionPatch {
            schedule: Some(ScheduleDefinition::hourly(2)),
            ..SubscriptionPatch::default()
        };
        let updated = f.manager.update_subscription(&sub.id, patch).await.unwrap();
        assert_eq!(updated.next_delivery, Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()));

        let bad = SubscriptionPatch {
            delivery: Some(DeliveryConfig::email(Vec::<String>::new())),
            ..SubscriptionPatch::default()
        };
        assert!(f.manager.update_subscription(&sub.id, bad).await.unwrap_err().is_validation());
    }
}
