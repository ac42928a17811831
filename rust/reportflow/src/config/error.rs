//! Configuration validation errors.

use thiserror::Error;

/// One rejected setting, naming the environment variable that overrides it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    #[error("{setting} is required (set {env_var})")]
    Missing {
        setting: &'static str,
        env_var: &'static str,
    },

    #[error("{setting} must be greater than zero (set {env_var}, default {default})")]
    NotPositive {
        setting: &'static str,
        env_var: &'static str,
        default: u64,
    },
}

impl ConfigIssue {
    #[must_use]
    pub fn setting(&self) -> &'static str {
        match self {
            Self::Missing { setting, .. } | Self::NotPositive { setting, .. } => setting,
        }
    }
}

/// Every issue found in one validation pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {}", render(.issues))]
pub struct ConfigurationError {
    pub issues: Vec<ConfigIssue>,
}

fn render(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigurationError>;
