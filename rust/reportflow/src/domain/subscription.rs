//! Subscriptions and delivery attempts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ExportFormat, FilterSpec, Parameters, ScheduleDefinition};
use crate::error::{CoreResult, ReportError};

/// Where a delivery goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryConfig {
    Email {
        recipients: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
    },
    Webhook {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Ftp {
        host: String,
        #[serde(default)]
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    Storage {
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    Filesystem {
        directory: String,
    },
}

impl DeliveryConfig {
    /// Email delivery without a subject.
    pub fn email<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Email {
            recipients: recipients.into_iter().map(Into::into).collect(),
            subject: None,
        }
    }

    /// Name of the channel that handles this config.
    #[must_use]
    pub fn channel_name(&self) -> &'static str {
        match self {
            Self::Email { .. } => "email",
            Self::Webhook { .. } => "webhook",
            Self::Ftp { .. } => "ftp",
            Self::Storage { .. } => "storage",
            Self::Filesystem { .. } => "filesystem",
        }
    }

    /// Number of addressees: email recipients, otherwise one target.
    #[must_use]
    pub fn recipient_count(&self) -> usize {
        match self {
            Self::Email { recipients, .. } => recipients.len(),
            _ => 1,
        }
    }

    /// Check the channel-specific required fields.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            Self::Email { recipients, .. } => {
                if recipients.iter().all(|r| r.trim().is_empty()) {
                    return Err(ReportError::validation(
                        "email delivery requires at least one recipient",
                    ));
                }
                if let Some(bad) = recipients.iter().find(|r| !r.trim().is_empty() && !r.contains('@')) {
                    return Err(ReportError::validation(format!(
                        "'{bad}' is not an email address"
                    )));
                }
            }
            Self::Webhook { url, .. } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ReportError::validation(
                        "webhook delivery requires an http(s) url",
                    ));
                }
            }
            Self::Ftp { host, .. } => {
                if host.trim().is_empty() {
                    return Err(ReportError::validation("ftp delivery requires a host"));
                }
            }
            Self::Storage { bucket, .. } => {
                if bucket.trim().is_empty() {
                    return Err(ReportError::validation("storage delivery requires a bucket"));
                }
            }
            Self::Filesystem { directory } => {
                if directory.trim().is_empty() {
                    return Err(ReportError::validation(
                        "filesystem delivery requires a directory",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A user's recurring request to receive a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    pub report_id: String,
    pub user_id: String,
    pub schedule: ScheduleDefinition,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub format: ExportFormat,
    pub delivery: DeliveryConfig,
    /// Row filters merged into the report's global filters for each run.
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_delivery: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivery: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_delivery.is_some_and(|next| next <= now)
    }

    /// Disable and clear `next_delivery`.
    pub fn disable(&mut self, now: DateTime<Utc>) {
        self.enabled = false;
        self.next_delivery = None;
        self.updated_at = now;
    }
}

fn default_enabled() -> bool {
    true
}

/// Input for creating a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubscription {
    pub name: String,
    pub report_id: String,
    pub user_id: String,
    pub schedule: ScheduleDefinition,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub format: ExportFormat,
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewSubscription {
    pub fn new(
        name: impl Into<String>,
        report_id: impl Into<String>,
        user_id: impl Into<String>,
        schedule: ScheduleDefinition,
        delivery: DeliveryConfig,
    ) -> Self {
        Self {
            name: name.into(),
            report_id: report_id.into(),
            user_id: user_id.into(),
            schedule,
            parameters: Parameters::new(),
            format: ExportFormat::default(),
            delivery,
            filters: Vec::new(),
            enabled: true,
            expires_at: None,
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: ExportFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Partial update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ExportFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<FilterSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Delivery attempt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

/// One delivery attempt for a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDelivery {
    pub id: String,
    pub subscription_id: String,
    pub report_id: String,
    pub report_name: String,
    pub status: DeliveryStatus,
    pub recipient_count: usize,
    #[serde(default)]
    pub artifact_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl SubscriptionDelivery {
    /// Start a `processing` attempt.
    pub fn start(subscription: &Subscription, report_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subscription_id: subscription.id.clone(),
            report_id: subscription.report_id.clone(),
            report_name: report_name.into(),
            status: DeliveryStatus::Processing,
            recipient_count: subscription.delivery.recipient_count(),
            artifact_size: 0,
            artifact_location: None,
            error: None,
            started_at: now,
            completed_at: None,
            duration_ms: None,
        }
    }

    fn finish(&mut self, status: DeliveryStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = u64::try_from((now - self.started_at).num_milliseconds()).ok();
    }

    pub fn succeed(&mut self, artifact_size: usize, location: impl Into<String>, now: DateTime<Utc>) {
        self.artifact_size = artifact_size;
        self.artifact_location = Some(location.into());
        self.finish(DeliveryStatus::Success, now);
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.error = Some(error.into());
        self.finish(DeliveryStatus::Failed, now);
    }
}
