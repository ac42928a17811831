//! Delivery channels.
//!
//! A channel hands an exported artifact to its destination and returns a
//! location string (file path, URL, message id). Channels are registered by
//! name, matching [`DeliveryConfig::channel_name`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::ExportArtifact;
use crate::domain::{DeliveryConfig, ReportResult};
use crate::error::{CoreResult, ReportError};

/// What a channel delivers.
#[derive(Debug, Clone)]
pub struct DeliveryPayload {
    pub report_id: String,
    pub report_name: String,
    /// Subject line for channels that carry one.
    pub subject: String,
    pub file_name: String,
    pub artifact: ExportArtifact,
}

impl DeliveryPayload {
    /// Payload for a generated result. The file is named after the report and
    /// its generation time.
    pub fn for_result(result: &ReportResult, artifact: ExportArtifact, subject: impl Into<String>) -> Self {
        let stem = format!(
            "{}-{}",
            result.report_name,
            result.generated_at.format("%Y%m%dT%H%M%SZ")
        );
        Self {
            report_id: result.report_id.clone(),
            report_name: result.report_name.clone(),
            subject: subject.into(),
            file_name: artifact.file_name(&stem),
            artifact,
        }
    }
}

/// Transport to one kind of destination.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Deliver and return the location of the delivered artifact.
    async fn deliver(&self, config: &DeliveryConfig, payload: &DeliveryPayload) -> anyhow::Result<String>;
}

/// Channels keyed by name (`email`, `webhook`, `ftp`, `storage`,
/// `filesystem`).
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<RwLock<HashMap<String, Arc<dyn DeliveryChannel>>>>,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.names())
            .finish()
    }
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the filesystem and webhook channels.
    #[must_use]
    pub fn with_defaults(output_dir: impl Into<PathBuf>) -> Self {
        let registry = Self::new();
        registry.register("filesystem", Arc::new(FileSystemChannel::new(output_dir)));
        registry.register("webhook", Arc::new(WebhookChannel::new()));
        registry
    }

    /// Register (or replace) a channel.
    pub fn register(&self, name: impl Into<String>, channel: Arc<dyn DeliveryChannel>) {
        self.channels.write().insert(name.into(), channel);
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Send through the channel named by the config. Missing channels and
    /// transport failures surface as `Delivery` errors.
    pub async fn dispatch(&self, config: &DeliveryConfig, payload: &DeliveryPayload) -> CoreResult<String> {
        let name = config.channel_name();
        let channel = self
            .channels
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ReportError::delivery(format!("no delivery channel registered for '{name}'")))?;

        channel
            .deliver(config, payload)
            .await
            .map_err(|e| ReportError::delivery(format!("{name} delivery failed: {e:#}")))
    }
}

/// Writes artifacts into a directory.
#[derive(Debug, Clone)]
pub struct FileSystemChannel {
    default_dir: PathBuf,
}

impl FileSystemChannel {
    pub fn new(default_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_dir: default_dir.into(),
        }
    }
}

#[async_trait]
impl DeliveryChannel for FileSystemChannel {
    async fn deliver(&self, config: &DeliveryConfig, payload: &DeliveryPayload) -> anyhow::Result<String> {
        let dir = match config {
            DeliveryConfig::Filesystem { directory } if !directory.is_empty() => PathBuf::from(directory),
            DeliveryConfig::Filesystem { .. } => self.default_dir.clone(),
            other => anyhow::bail!("filesystem channel cannot handle {} delivery", other.channel_name()),
        };

        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = dir.join(&payload.file_name);
        tokio::fs::write(&path, &payload.artifact.bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::debug!(path = %path.display(), bytes = payload.artifact.size(), "Artifact written");
        Ok(path.display().to_string())
    }
}

/// POSTs artifacts to an HTTP endpoint.
#[derive(Debug, Clone, Default)]
pub struct WebhookChannel {
    client: reqwest::Client,
}

impl WebhookChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    async fn deliver(&self, config: &DeliveryConfig, payload: &DeliveryPayload) -> anyhow::Result<String> {
        let DeliveryConfig::Webhook { url, headers } = config else {
            anyhow::bail!("webhook channel cannot handle {} delivery", config.channel_name());
        };

        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, payload.artifact.mime.as_str())
            .header("X-Report-Id", payload.report_id.as_str())
            .header("X-Report-Name", payload.report_name.as_str())
            .header(
                reqwest::header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", payload.file_name),
            );
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(payload.artifact.bytes.clone())
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} rejected the delivery"))?;

        tracing::debug!(url = %url, status = %response.status(), "Webhook delivered");
        Ok(url.clone())
    }
}
