//! Dispatcher configuration.
//!
//! The configuration surface is small: the tick interval, the error policy,
//! and whether the tick source stops itself once no work is pending.
//!
//! ```
//! use std::time::Duration;
//! use thread_updater::{DispatcherConfig, ErrorPolicy};
//!
//! let config = DispatcherConfig::from_toml_str(
//!     r#"
//!     interval_seconds = 0.125
//!     error_policy = "hide"
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.interval, Duration::from_millis(125));
//! assert_eq!(config.error_policy, ErrorPolicy::Suppress);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policy::ErrorPolicy;

/// Default tick interval: 1/30 of a second.
pub const DEFAULT_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 30);

/// Convert a float number of seconds into a tick interval.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidInterval`] unless `secs` is finite and
/// greater than zero.
pub fn interval_from_secs(secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidInterval(secs));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidInterval(secs))
}

/// Configuration for creating a `Dispatcher`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawConfig")]
pub struct DispatcherConfig {
    /// Interval between ticks.
    pub interval: Duration,
    /// How failures of scheduled calls are handled.
    pub error_policy: ErrorPolicy,
    /// Stop the tick source after a drain that leaves nothing pending.
    pub stop_when_idle: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            error_policy: ErrorPolicy::default(),
            stop_when_idle: false,
        }
    }
}

impl DispatcherConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tick interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the error policy.
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Stop ticking whenever a drain leaves all collections empty.
    pub fn stop_when_idle(mut self, stop: bool) -> Self {
        self.stop_when_idle = stop;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidInterval(0.0));
        }
        Ok(())
    }

    /// Parse a configuration from a TOML document.
    ///
    /// Recognized keys are `interval_seconds`, `error_policy` and
    /// `stop_when_idle`; all are optional.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }
}

/// Wire shape of [`DispatcherConfig`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    interval_seconds: Option<f64>,
    #[serde(default)]
    error_policy: ErrorPolicy,
    #[serde(default)]
    stop_when_idle: bool,
}

impl TryFrom<RawConfig> for DispatcherConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            interval: match raw.interval_seconds {
                Some(secs) => interval_from_secs(secs)?,
                None => DEFAULT_INTERVAL,
            },
            error_policy: raw.error_policy,
            stop_when_idle: raw.stop_when_idle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert_eq!(config.error_policy, ErrorPolicy::Report);
        assert!(!config.stop_when_idle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = DispatcherConfig::new()
            .interval(Duration::from_millis(5))
            .error_policy(ErrorPolicy::Propagate)
            .stop_when_idle(true);

        assert_eq!(config.interval, Duration::from_millis(5));
        assert_eq!(config.error_policy, ErrorPolicy::Propagate);
        assert!(config.stop_when_idle);
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let config = DispatcherConfig::new().interval(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::InvalidInterval(0.0)));
    }

    #[test]
    fn test_interval_from_secs() {
        assert_eq!(interval_from_secs(0.5).unwrap(), Duration::from_millis(500));
        assert!(interval_from_secs(0.0).is_err());
        assert!(interval_from_secs(-1.0).is_err());
        assert!(interval_from_secs(f64::NAN).is_err());
        assert!(interval_from_secs(f64::INFINITY).is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = DispatcherConfig::from_toml_str(
            "interval_seconds = 0.25\nerror_policy = \"raise\"\nstop_when_idle = true\n",
        )
        .unwrap();
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.error_policy, ErrorPolicy::Propagate);
        assert!(config.stop_when_idle);

        let empty = DispatcherConfig::from_toml_str("").unwrap();
        assert_eq!(empty, DispatcherConfig::default());
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        assert!(matches!(
            DispatcherConfig::from_toml_str("interval_seconds = -2.0"),
            Err(ConfigError::Parse(_))
        ));
        assert!(DispatcherConfig::from_toml_str("error_policy = \"loud\"").is_err());
        assert!(DispatcherConfig::from_toml_str("tick = 1").is_err());
    }
}
