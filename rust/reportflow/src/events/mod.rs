//! Local notification bus for report, execution, schedule and delivery events.
//!
//! Handlers are registered per event name (or for every event) and invoked
//! synchronously, in registration order, on the emitting task. There is no
//! buffering, no cross-process fan-out and no at-least-once guarantee: a
//! handler registered after an event was emitted never sees it.
//!
//! ```text
//! Engine / Scheduler / Delivery → EventBus::emit(event) → [handler 1, handler 2, ...]
//! ```
//!
//! ```rust,ignore
//! let bus = EventBus::new();
//! bus.subscribe("execution.completed", |event| {
//!     tracing::info!(execution_id = ?event.execution_id(), "done");
//! });
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Events emitted by the report core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportEvent {
    // === Report lifecycle ===
    ReportRegistered {
        report_id: String,
        name: String,
    },
    ReportUpdated {
        report_id: String,
        version: u32,
    },
    ReportDeleted {
        report_id: String,
    },

    // === Execution ===
    ExecutionStarted {
        execution_id: String,
        report_id: String,
        timestamp: DateTime<Utc>,
    },
    DatasetLoaded {
        execution_id: String,
        report_id: String,
        dataset: String,
        row_count: usize,
    },
    ExecutionCompleted {
        execution_id: String,
        report_id: String,
        row_count: usize,
        duration_ms: u64,
    },
    ExecutionFailed {
        execution_id: String,
        report_id: String,
        error: String,
    },
    ExecutionCancelled {
        execution_id: String,
        report_id: String,
    },

    // === Schedules ===
    ScheduleCreated {
        schedule_id: String,
        report_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_run: Option<DateTime<Utc>>,
    },
    ScheduleRemoved {
        schedule_id: String,
    },
    ScheduleFired {
        schedule_id: String,
        report_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_run: Option<DateTime<Utc>>,
    },

    // === Subscriptions ===
    SubscriptionCreated {
        subscription_id: String,
        report_id: String,
    },
    DeliveryQueued {
        subscription_id: String,
        queue_length: usize,
    },
    DeliveryStarted {
        subscription_id: String,
        delivery_id: String,
    },
    DeliveryCompleted {
        subscription_id: String,
        delivery_id: String,
        location: String,
    },
    DeliveryFailed {
        subscription_id: String,
        delivery_id: String,
        error: String,
    },
}

impl ReportEvent {
    /// Dotted event name used for handler registration.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReportRegistered { .. } => "report.registered",
            Self::ReportUpdated { .. } => "report.updated",
            Self::ReportDeleted { .. } => "report.deleted",
            Self::ExecutionStarted { .. } => "execution.started",
            Self::DatasetLoaded { .. } => "dataset.loaded",
            Self::ExecutionCompleted { .. } => "execution.completed",
            Self::ExecutionFailed { .. } => "execution.failed",
            Self::ExecutionCancelled { .. } => "execution.cancelled",
            Self::ScheduleCreated { .. } => "schedule.created",
            Self::ScheduleRemoved { .. } => "schedule.removed",
            Self::ScheduleFired { .. } => "schedule.fired",
            Self::SubscriptionCreated { .. } => "subscription.created",
            Self::DeliveryQueued { .. } => "delivery.queued",
            Self::DeliveryStarted { .. } => "delivery.started",
            Self::DeliveryCompleted { .. } => "delivery.completed",
            Self::DeliveryFailed { .. } => "delivery.failed",
        }
    }

    /// Execution id carried by execution-scoped events.
    #[must_use]
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::DatasetLoaded { execution_id, .. }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::ExecutionFailed { execution_id, .. }
            | Self::ExecutionCancelled { execution_id, .. } => Some(execution_id),
            _ => None,
        }
    }
}

/// Event handler callback.
pub type EventHandler = Arc<dyn Fn(&ReportEvent) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Wildcard key for handlers that receive every event.
const ALL_EVENTS: &str = "*";

#[derive(Default)]
struct Registry {
    /// (id, event name, handler) in registration order.
    handlers: Vec<(HandlerId, String, EventHandler)>,
}

/// Synchronous observer registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event name (e.g. `"delivery.failed"`).
    pub fn subscribe<F>(&self, event_name: &str, handler: F) -> HandlerId
    where
        F: Fn(&ReportEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry
            .write()
            .handlers
            .push((id, event_name.to_string(), Arc::new(handler)));
        id
    }

    /// Register a handler for every event.
    pub fn subscribe_all<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ReportEvent) + Send + Sync + 'static,
    {
        self.subscribe(ALL_EVENTS, handler)
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut registry = self.registry.write();
        let before = registry.handlers.len();
        registry.handlers.retain(|(hid, _, _)| *hid != id);
        before != registry.handlers.len()
    }

    /// Invoke matching handlers in registration order.
    ///
    /// Handlers run outside the registry lock so they may subscribe or emit.
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &ReportEvent) -> usize {
        let name = event.name();
        let matching: Vec<EventHandler> = self
            .registry
            .read()
            .handlers
            .iter()
            .filter(|(_, event_name, _)| event_name == name || event_name == ALL_EVENTS)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();

        for handler in &matching {
            handler(event);
        }
        matching.len()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.registry.read().handlers.len()
    }

    /// Registered handler counts keyed by event name.
    #[must_use]
    pub fn handler_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for (_, name, _) in &self.registry.read().handlers {
            *counts.entry(name.clone()).or_insert(0) += 1;
        }
        counts
    }
}
