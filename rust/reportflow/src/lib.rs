//! reportflow - report execution and scheduling core
//!
//! Turns report definitions into cached results, re-runs them on schedules and
//! fans them out to subscribers:
//!
//! - **Execution engine**: parameter binding, dataset loading, filtering,
//!   aggregation, sorting, visualization data, result caching and execution
//!   tracking with cooperative cancellation
//! - **Schedule manager**: once/hourly/daily/weekly/monthly/cron jobs in any
//!   IANA timezone, fired by a periodic sweep
//! - **Subscription delivery**: per-user subscriptions delivered through a
//!   single-drainer FIFO queue to email, webhook, FTP, storage or filesystem
//!   channels
//!
//! # Architecture
//!
//! - [`engine`]: report registry and generation pipeline
//! - [`scheduler`]: scheduled jobs, next-run computation and cron evaluation
//! - [`delivery`]: subscriptions and the delivery queue
//! - [`collaborators`]: loader, aggregator, exporter and channel contracts with
//!   reference implementations
//! - [`store`]: durable document store (`SQLite`, in-memory) and repositories
//! - [`events`]: local event bus
//! - [`service`]: wiring and lifecycle
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reportflow::collaborators::InMemoryDatasetLoader;
//! use reportflow::config::AppConfig;
//! use reportflow::service::ReportService;
//! use reportflow::store::SqliteStore;
//!
//! let config = AppConfig::load(None)?;
//! let store = Arc::new(SqliteStore::new(&config.database.path).await?);
//! let loader = Arc::new(InMemoryDatasetLoader::new());
//! let service = ReportService::builder(store, loader, config).build();
//! service.init().await?;
//! ```

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod scheduler;
pub mod service;
pub mod store;

pub use error::{CoreResult, ReportError};
pub use service::ReportService;
