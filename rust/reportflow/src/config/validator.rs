//! Configuration validation.
//!
//! Rejects settings that would stall the sweeps or make every cache entry
//! expire on write, with messages that name the environment variable to fix.

use super::error::{ConfigIssue, ConfigResult, ConfigurationError};
use super::AppConfig;

/// Validates an [`AppConfig`] before the service starts.
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Collect every issue in `config`; any issue fails validation.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut issues = Vec::new();

        if config.database.path.trim().is_empty() {
            issues.push(ConfigIssue::Missing {
                setting: "database.path",
                env_var: "REPORTFLOW__DATABASE__PATH",
            });
        }

        let positive = [
            (
                "engine.default_cache_ttl_secs",
                "REPORTFLOW__ENGINE__DEFAULT_CACHE_TTL_SECS",
                config.engine.default_cache_ttl_secs,
                super::default_cache_ttl(),
            ),
            (
                "engine.max_retained_executions",
                "REPORTFLOW__ENGINE__MAX_RETAINED_EXECUTIONS",
                count(config.engine.max_retained_executions),
                count(super::default_max_retained_executions()),
            ),
            (
                "scheduler.sweep_interval_secs",
                "REPORTFLOW__SCHEDULER__SWEEP_INTERVAL_SECS",
                config.scheduler.sweep_interval_secs,
                super::default_sweep_interval(),
            ),
            (
                "delivery.sweep_interval_secs",
                "REPORTFLOW__DELIVERY__SWEEP_INTERVAL_SECS",
                config.delivery.sweep_interval_secs,
                super::default_sweep_interval(),
            ),
            (
                "delivery.drain_interval_ms",
                "REPORTFLOW__DELIVERY__DRAIN_INTERVAL_MS",
                config.delivery.drain_interval_ms,
                super::default_drain_interval(),
            ),
        ];
        issues.extend(
            positive
                .into_iter()
                .filter(|&(_, _, value, _)| value == 0)
                .map(|(setting, env_var, _, default)| ConfigIssue::NotPositive {
                    setting,
                    env_var,
                    default,
                }),
        );

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError { issues })
        }
    }
}

fn count(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
