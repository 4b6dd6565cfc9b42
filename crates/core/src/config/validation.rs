//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - any cache TTL or the purge interval is 0
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `availability_days` is 0 or exceeds 31
    /// - `max_slots` is 0
    /// - `bind_addr` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, secs) in [
            ("memory_ttl_secs", self.memory_ttl_secs),
            ("slots_ttl_secs", self.slots_ttl_secs),
            ("context_ttl_secs", self.context_ttl_secs),
            ("prompt_ttl_secs", self.prompt_ttl_secs),
            ("purge_interval_secs", self.purge_interval_secs),
        ] {
            if secs == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.availability_days == 0 || self.availability_days > 31 {
            return Err(invalid("availability_days", "must be between 1 and 31"));
        }

        if self.max_slots == 0 {
            return Err(invalid("max_slots", "must be greater than 0"));
        }

        if self.bind_addr.trim().is_empty() {
            return Err(invalid("bind_addr", "must not be empty"));
        }

        if self.ghl_calendar_id.is_some() && !self.ghl_configured() {
            tracing::warn!(
                calendar_id = self.ghl_calendar_id.as_deref(),
                "ghl_calendar_id is set without GHL credentials; availability will be empty"
            );
        }

        if self.langfuse_public_key.is_some() != self.langfuse_secret_key.is_some() {
            tracing::warn!("only one Langfuse key is set; falling back to static prompts");
        }

        Ok(())
    }
}
