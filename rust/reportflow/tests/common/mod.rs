//! Shared fixtures for integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use reportflow::clock::ManualClock;
use reportflow::collaborators::{
    ChannelRegistry, DatasetLoader, DeliveryChannel, DeliveryPayload, InMemoryDatasetLoader,
};
use reportflow::config::AppConfig;
use reportflow::domain::{DatasetSpec, DeliveryConfig, Parameters, ReportDefinition, Row};
use reportflow::events::{EventBus, ReportEvent};
use reportflow::store::DurableStore;
use reportflow::ReportService;

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn rows(values: &[Value]) -> Vec<Row> {
    values.iter().filter_map(|v| v.as_object().cloned()).collect()
}

/// Sales (3 rows) and customers (2 rows).
pub fn sample_tables() -> InMemoryDatasetLoader {
    InMemoryDatasetLoader::new()
        .with_table(
            "sales",
            rows(&[
                json!({"id": 1, "region": "north", "amount": 120}),
                json!({"id": 2, "region": "south", "amount": 80}),
                json!({"id": 3, "region": "north", "amount": 45}),
            ]),
        )
        .with_table(
            "customers",
            rows(&[
                json!({"id": 10, "name": "Acme"}),
                json!({"id": 11, "name": "Globex"}),
            ]),
        )
}

pub fn sales_report() -> ReportDefinition {
    ReportDefinition::new("Sales")
        .with_dataset(DatasetSpec::new("Sales", "sales", ["*"]))
        .with_dataset(DatasetSpec::new("Customers", "customers", ["*"]))
}

/// Loader that counts calls and can hold the first call until released.
#[derive(Debug, Default)]
pub struct GatedLoader {
    inner: InMemoryDatasetLoader,
    calls: AtomicUsize,
    gate_first: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedLoader {
    pub fn new(inner: InMemoryDatasetLoader) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Hold the first load until [`Self::release`] is notified.
    pub fn gated(self) -> Self {
        self.gate_first.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetLoader for GatedLoader {
    async fn load(&self, spec: &DatasetSpec, parameters: &Parameters) -> anyhow::Result<Vec<Row>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 && self.gate_first.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.load(spec, parameters).await
    }
}

/// Channel that records deliveries, tracks concurrency and can hold or fail.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    /// (target, subject, file name) in delivery order.
    pub delivered: Mutex<Vec<(String, String, String)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    gate_first: AtomicBool,
    started: AtomicUsize,
    pub entered: Notify,
    pub release: Notify,
    pub fail: AtomicBool,
}

impl RecordingChannel {
    pub fn gated() -> Self {
        let channel = Self::default();
        channel.gate_first.store(true, Ordering::SeqCst);
        channel
    }

    pub fn targets(&self) -> Vec<String> {
        self.delivered.lock().iter().map(|(t, _, _)| t.clone()).collect()
    }
}

fn target(config: &DeliveryConfig) -> String {
    match config {
        DeliveryConfig::Email { recipients, .. } => recipients.join(","),
        DeliveryConfig::Webhook { url, .. } => url.clone(),
        DeliveryConfig::Ftp { host, .. } => host.clone(),
        DeliveryConfig::Storage { bucket, .. } => bucket.clone(),
        DeliveryConfig::Filesystem { directory } => directory.clone(),
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn deliver(&self, config: &DeliveryConfig, payload: &DeliveryPayload) -> anyhow::Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let nth = self.started.fetch_add(1, Ordering::SeqCst);
        if nth == 0 && self.gate_first.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("endpoint unavailable");
        }

        let target = target(config);
        self.delivered.lock().push((
            target.clone(),
            payload.subject.clone(),
            payload.file_name.clone(),
        ));
        Ok(format!("recorded://{target}/{}", payload.file_name))
    }
}

/// Config with both background loops off, so tests drive sweeps by hand.
pub fn manual_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.scheduler.enabled = false;
    config.delivery.enabled = false;
    config
}

/// Collects event names in emission order.
pub fn record_events(bus: &EventBus) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe_all(move |event: &ReportEvent| sink.lock().push(event.name().to_string()));
    seen
}

pub struct Harness {
    pub service: ReportService,
    pub clock: ManualClock,
    pub bus: EventBus,
    pub channels: ChannelRegistry,
}

pub fn harness(
    store: Arc<dyn DurableStore>,
    loader: Arc<dyn DatasetLoader>,
    start: DateTime<Utc>,
) -> Harness {
    let clock = ManualClock::new(start);
    let bus = EventBus::new();
    let channels = ChannelRegistry::new();
    let service = ReportService::builder(store, loader, manual_config())
        .with_clock(Arc::new(clock.clone()))
        .with_channels(channels.clone())
        .with_bus(bus.clone())
        .build();
    Harness {
        service,
        clock,
        bus,
        channels,
    }
}
