//! Contracts for the components the core consumes but does not own, plus the
//! reference adapters shipped with the daemon.
//!
//! | Contract           | Adapters                                               |
//! |--------------------|--------------------------------------------------------|
//! | [`DatasetLoader`]  | [`InMemoryDatasetLoader`]                              |
//! | [`Aggregator`]     | [`DefaultAggregator`]                                  |
//! | [`Exporter`]       | JSON, CSV, YAML, Markdown, HTML, text                  |
//! | [`DeliveryChannel`]| [`FileSystemChannel`], [`WebhookChannel`]              |
//!
//! The cron evaluator contract lives in [`crate::scheduler::cron`].

pub mod aggregator;
pub mod channel;
pub mod exporter;
pub mod loader;

pub use aggregator::{Aggregator, DefaultAggregator};
pub use channel::{ChannelRegistry, DeliveryChannel, DeliveryPayload, FileSystemChannel, WebhookChannel};
pub use exporter::{ExportArtifact, ExportOptions, Exporter, ExporterRegistry};
pub use loader::{DatasetLoader, InMemoryDatasetLoader};
