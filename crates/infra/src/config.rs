//! Environment-driven bridge configuration.
//!
//! In production every required variable must be set; with `LAKEGATE_DEV=1`
//! (or in tests) missing values fall back to documented dev defaults.

use std::time::Duration;

use thiserror::Error;
use tracing::info;

use lakegate_core::{DomainError, KeyMapping};
use lakegate_events::DispatchPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {cause}")]
    Invalid { name: &'static str, cause: String },
}

impl ConfigError {
    fn invalid(name: &'static str, cause: impl ToString) -> Self {
        Self::Invalid {
            name,
            cause: cause.to_string(),
        }
    }
}

/// Process configuration for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Object-store bucket holding the event objects.
    pub bucket: String,
    /// Key prefix scoping the stream (may be empty).
    pub object_prefix: String,
    /// Name of the live notification channel.
    pub source_channel: String,
    /// Name of the replay channel.
    pub replay_channel: String,
    /// Name of the downstream digest channel.
    pub digest_channel: String,
    /// Processing timeout budget per delivery; the channels derive their
    /// visibility window from this (2x).
    pub processing_budget: Duration,
}

const DEV_BUCKET: &str = "lakegate-bucket-dev";
const DEV_PREFIX: &str = "events/";
const DEV_SOURCE_CHANNEL: &str = "lakegate-source-dev";
const DEV_REPLAY_CHANNEL: &str = "lakegate-replay-dev";
const DEV_DIGEST_CHANNEL: &str = "lakegate-digest-dev";
const DEFAULT_PROCESSING_BUDGET_SECS: u64 = 30;

impl BridgeConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let dev = std::env::var("LAKEGATE_DEV").map(|v| v == "1").unwrap_or(false);

        let required = |name: &'static str, dev_default: &str| -> Result<String, ConfigError> {
            match std::env::var(name) {
                Ok(value) if !value.is_empty() => Ok(value),
                _ if dev => Ok(dev_default.to_string()),
                _ => Err(ConfigError::Missing(name)),
            }
        };

        let processing_budget = match std::env::var("LAKEGATE_PROCESSING_BUDGET_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .map_err(|e| ConfigError::invalid("LAKEGATE_PROCESSING_BUDGET_SECS", e))?,
            ),
            Err(_) => Duration::from_secs(DEFAULT_PROCESSING_BUDGET_SECS),
        };

        let config = Self {
            bucket: required("LAKEGATE_BUCKET", DEV_BUCKET)?,
            object_prefix: std::env::var("LAKEGATE_OBJECT_PREFIX")
                .unwrap_or_else(|_| if dev { DEV_PREFIX.to_string() } else { String::new() }),
            source_channel: required("LAKEGATE_SOURCE_CHANNEL", DEV_SOURCE_CHANNEL)?,
            replay_channel: required("LAKEGATE_REPLAY_CHANNEL", DEV_REPLAY_CHANNEL)?,
            digest_channel: required("LAKEGATE_DIGEST_CHANNEL", DEV_DIGEST_CHANNEL)?,
            processing_budget,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.is_empty() {
            return Err(ConfigError::invalid("LAKEGATE_BUCKET", "must not be empty"));
        }
        if self.object_prefix.starts_with('/') {
            return Err(ConfigError::invalid(
                "LAKEGATE_OBJECT_PREFIX",
                "must be bucket-relative",
            ));
        }
        Ok(())
    }

    /// The key → id mapping for this configuration's scope.
    pub fn key_mapping(&self) -> Result<KeyMapping, DomainError> {
        KeyMapping::new(self.bucket.clone(), self.object_prefix.clone())
    }

    /// The dispatch policy shared by all three channels, derived from the
    /// processing budget.
    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy::for_processing_budget(self.processing_budget)
    }

    /// Log the non-sensitive configuration at startup.
    pub fn log(&self) {
        info!(
            bucket = %self.bucket,
            object_prefix = %self.object_prefix,
            source_channel = %self.source_channel,
            replay_channel = %self.replay_channel,
            digest_channel = %self.digest_channel,
            processing_budget_secs = self.processing_budget.as_secs(),
            "configuration loaded"
        );
    }
}
