//! Configuration types

use crate::{ConfigError, StadefError, StadefResult, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Operational period configuration.
///
/// Both durations are look-backs from "now": the operational window is
/// `[now - operational_period_start, now - operational_period_end]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub operational_period_start: Duration,
    pub operational_period_end: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            operational_period_start: Duration::from_secs(24 * 60 * 60),
            operational_period_end: Duration::ZERO,
        }
    }
}

impl CacheConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// - `STADEF_OPERATIONAL_PERIOD_START_SECS`
    /// - `STADEF_OPERATIONAL_PERIOD_END_SECS`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            operational_period_start: std::env::var("STADEF_OPERATIONAL_PERIOD_START_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.operational_period_start),
            operational_period_end: std::env::var("STADEF_OPERATIONAL_PERIOD_END_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.operational_period_end),
        }
    }

    /// Validate the configuration.
    ///
    /// The start look-back must be strictly longer than the end look-back,
    /// otherwise the window would be empty or inverted.
    pub fn validate(&self) -> StadefResult<()> {
        if self.operational_period_start <= self.operational_period_end {
            return Err(StadefError::Config(ConfigError::InvalidValue {
                field: "operational_period_start".to_string(),
                value: format!("{:?}", self.operational_period_start),
                reason: format!(
                    "must be greater than operational_period_end ({:?})",
                    self.operational_period_end
                ),
            }));
        }
        Ok(())
    }

    /// Window bounds relative to `now`, as `(start, end)`.
    pub fn operational_range(&self, now: Timestamp) -> StadefResult<(Timestamp, Timestamp)> {
        self.validate()?;
        let start = look_back(now, self.operational_period_start, "operational_period_start")?;
        let end = look_back(now, self.operational_period_end, "operational_period_end")?;
        Ok((start, end))
    }
}

fn look_back(now: Timestamp, period: Duration, field: &str) -> StadefResult<Timestamp> {
    chrono::Duration::from_std(period)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .ok_or_else(|| {
            StadefError::Config(ConfigError::InvalidValue {
                field: field.to_string(),
                value: format!("{:?}", period),
                reason: "period reaches outside the representable time range".to_string(),
            })
        })
}

// =============================================================================
// TESTS
// =============================================================================
