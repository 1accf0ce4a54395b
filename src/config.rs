//! Engine configuration
//!
//! All values default to the behaviour of the production mobile client.
//! Watchdog timing is configurable so tests can run with shortened values.

use crate::error::PulseError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Silence (seconds) after which an active workout is demoted to paused
pub const DEFAULT_SIGNAL_LOSS_THRESHOLD_SECONDS: f64 = 5.0;
/// How often the watchdog checks for silence (seconds)
pub const DEFAULT_WATCHDOG_POLL_INTERVAL_SECONDS: f64 = 2.0;
/// Upper bound for the watchdog threshold and poll interval (one day)
pub const MAX_WATCHDOG_SECONDS: f64 = 86_400.0;
/// Readings below this are treated as sensor dropouts (bpm)
pub const DEFAULT_MIN_VALID_HEART_RATE: u16 = 30;
/// kcal per (bpm × second)
pub const DEFAULT_CALORIE_COEFFICIENT: f64 = 0.1 / 60.0;
/// Assumed age used for the default maximum heart rate
pub const DEFAULT_ASSUMED_AGE: u16 = 30;
/// 220 − 30
pub const DEFAULT_ASSUMED_MAX_HEART_RATE: u16 = 220 - DEFAULT_ASSUMED_AGE;

/// Tunables for decoding, the watchdog and metrics aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub signal_loss_threshold_seconds: f64,
    pub watchdog_poll_interval_seconds: f64,
    pub min_valid_heart_rate: u16,
    pub calorie_coefficient: f64,
    pub assumed_max_heart_rate: u16,
    /// Bound on each device's sample history; `None` keeps everything
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_capacity: Option<usize>,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            signal_loss_threshold_seconds: DEFAULT_SIGNAL_LOSS_THRESHOLD_SECONDS,
            watchdog_poll_interval_seconds: DEFAULT_WATCHDOG_POLL_INTERVAL_SECONDS,
            min_valid_heart_rate: DEFAULT_MIN_VALID_HEART_RATE,
            calorie_coefficient: DEFAULT_CALORIE_COEFFICIENT,
            assumed_max_heart_rate: DEFAULT_ASSUMED_MAX_HEART_RATE,
            history_capacity: None,
        }
    }
}

impl PulseConfig {
    /// Default configuration with the maximum heart rate derived from `age`
    pub fn with_age(age: u16) -> Self {
        Self {
            assumed_max_heart_rate: 220u16.saturating_sub(age),
            ..Self::default()
        }
    }

    /// Override the watchdog timing
    pub fn with_watchdog(mut self, threshold: Duration, poll_interval: Duration) -> Self {
        self.signal_loss_threshold_seconds = threshold.as_secs_f64();
        self.watchdog_poll_interval_seconds = poll_interval.as_secs_f64();
        self
    }

    pub fn signal_loss_threshold(&self) -> Duration {
        seconds_to_duration(self.signal_loss_threshold_seconds)
    }

    pub fn watchdog_poll_interval(&self) -> Duration {
        seconds_to_duration(self.watchdog_poll_interval_seconds)
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), PulseError> {
        if !(self.signal_loss_threshold_seconds.is_finite()
            && self.signal_loss_threshold_seconds > 0.0)
        {
            return Err(PulseError::Config(format!(
                "signal_loss_threshold_seconds must be positive, got {}",
                self.signal_loss_threshold_seconds
            )));
        }
        if self.signal_loss_threshold_seconds > MAX_WATCHDOG_SECONDS {
            return Err(PulseError::Config(format!(
                "signal_loss_threshold_seconds must be at most {MAX_WATCHDOG_SECONDS}, got {}",
                self.signal_loss_threshold_seconds
            )));
        }
        if !(self.watchdog_poll_interval_seconds.is_finite()
            && self.watchdog_poll_interval_seconds > 0.0)
        {
            return Err(PulseError::Config(format!(
                "watchdog_poll_interval_seconds must be positive, got {}",
                self.watchdog_poll_interval_seconds
            )));
        }
        if self.watchdog_poll_interval_seconds > MAX_WATCHDOG_SECONDS {
            return Err(PulseError::Config(format!(
                "watchdog_poll_interval_seconds must be at most {MAX_WATCHDOG_SECONDS}, got {}",
                self.watchdog_poll_interval_seconds
            )));
        }
        if !(self.calorie_coefficient.is_finite() && self.calorie_coefficient >= 0.0) {
            return Err(PulseError::Config(format!(
                "calorie_coefficient must be a non-negative number, got {}",
                self.calorie_coefficient
            )));
        }
        if self.assumed_max_heart_rate == 0 {
            return Err(PulseError::Config(
                "assumed_max_heart_rate must be greater than zero".to_string(),
            ));
        }
        if self.history_capacity == Some(0) {
            return Err(PulseError::Config(
                "history_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load and validate a configuration from JSON; missing keys take defaults
    pub fn from_json(json: &str) -> Result<Self, PulseError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, PulseError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Negative and NaN map to zero, overflow saturates
fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX)
}
