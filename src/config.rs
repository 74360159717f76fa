//! Configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `DAQ_SUSPEND_`
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! DAQ_SUSPEND_APPLICATION__LOG_LEVEL=debug
//! DAQ_SUSPEND_WATCHER__HOLD_DOWN="10s"
//! DAQ_SUSPEND_WATCHER__CONDITION__MIN=0.2
//! ```
//!
//! # Example file
//!
//! ```toml
//! [application]
//! name = "beamline suspender"
//! log_level = "info"
//!
//! [watcher]
//! hold_down = "5s"
//! drop_and_retry = true
//!
//! [watcher.condition]
//! kind = "hysteresis"
//! suspend_below = 0.1
//! resume_above = 0.3
//!
//! [bundle_filter]
//! max_duration = "1s"
//! reject_below = { gas_detector = 0.05 }
//! ```

use crate::counter::ThresholdCounter;
use crate::filter::BundleFilter;
use crate::plan::Command;
use crate::resource::Device;
use crate::suspend::{BelowThreshold, ConditionValue, Hysteresis, NonZero, SuspendCondition};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read or parsed.
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    /// Values were read but do not make sense together.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuspendConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Condition watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Bundle-quality gate settings
    #[serde(default)]
    pub bundle_filter: BundleFilterConfig,
    /// Optional threshold counter
    #[serde(default)]
    pub threshold: Option<ThresholdConfig>,
    /// Optional demo scan
    #[serde(default)]
    pub scan: Option<ScanConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Condition watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Settle time after recovery, e.g. "5s" or "250ms"
    #[serde(default = "default_hold_down", with = "humantime_serde")]
    pub hold_down: Duration,
    /// Commands to suspend on; all commands when omitted
    #[serde(default)]
    pub commands: Option<Vec<Command>>,
    /// Drop and replay the open bundle on suspension
    #[serde(default)]
    pub drop_and_retry: bool,
    /// When to suspend and resume
    #[serde(default)]
    pub condition: ConditionConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            hold_down: default_hold_down(),
            commands: None,
            drop_and_retry: false,
            condition: ConditionConfig::default(),
        }
    }
}

/// Suspend condition, selected by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionConfig {
    /// Suspend while the value is nonzero
    NonZero,
    /// Suspend while the value is below `min`
    Below {
        /// Lowest acceptable level
        #[serde(default = "default_min_beam")]
        min: f64,
    },
    /// Suspend below `suspend_below`, resume at or above `resume_above`
    Hysteresis {
        /// Suspend threshold
        suspend_below: f64,
        /// Resume threshold
        resume_above: f64,
    },
}

impl Default for ConditionConfig {
    fn default() -> Self {
        ConditionConfig::Below {
            min: default_min_beam(),
        }
    }
}

impl ConditionConfig {
    /// Build the configured condition.
    pub fn build<V>(&self) -> Arc<dyn SuspendCondition<V>>
    where
        V: ConditionValue + Debug + 'static,
    {
        match *self {
            ConditionConfig::NonZero => Arc::new(NonZero),
            ConditionConfig::Below { min } => Arc::new(BelowThreshold::new(min)),
            ConditionConfig::Hysteresis {
                suspend_below,
                resume_above,
            } => Arc::new(Hysteresis::new(suspend_below, resume_above)),
        }
    }
}

/// Bundle-quality gate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleFilterConfig {
    /// Longest acceptable span between first and last read, e.g. "1s"
    #[serde(default, with = "humantime_serde")]
    pub max_duration: Option<Duration>,
    /// Per-key minimum values; bundles reading below are dropped
    #[serde(default)]
    pub reject_below: BTreeMap<String, f64>,
}

impl BundleFilterConfig {
    /// Whether any rule is configured.
    pub fn is_enabled(&self) -> bool {
        self.max_duration.is_some() || !self.reject_below.is_empty()
    }

    /// Build the configured filter.
    pub fn build(&self) -> BundleFilter {
        let filter = match self.max_duration {
            Some(max) => BundleFilter::new().with_max_duration(max),
            None => BundleFilter::new(),
        };
        self.reject_below
            .iter()
            .fold(filter, |filter, (key, min)| filter.with_minimum(key.clone(), *min))
    }
}

/// Threshold counter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Events needed (per category)
    pub target: u64,
    /// Categories counted separately; one tally when omitted
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

impl ThresholdConfig {
    /// Build the configured counter.
    pub fn build(&self) -> ThresholdCounter {
        match &self.categories {
            Some(categories) => ThresholdCounter::with_categories(self.target, categories.clone()),
            None => ThresholdCounter::new(self.target),
        }
    }
}

/// Demo step scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Device whose movable is scanned
    pub device: Device,
    /// Detectors read at every point
    #[serde(default = "default_detectors")]
    pub detectors: Vec<String>,
    /// First position
    pub start: f64,
    /// Last position
    pub stop: f64,
    /// Number of points, ends included
    pub points: usize,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "daq-suspend".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_hold_down() -> Duration {
    crate::suspend::DEFAULT_BEAM_HOLD_DOWN
}

fn default_min_beam() -> f64 {
    BelowThreshold::DEFAULT_MIN_BEAM
}

fn default_detectors() -> Vec<String> {
    vec!["det".to_string()]
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl SuspendConfig {
    /// Load configuration from `path` merged with `DAQ_SUSPEND_` environment
    /// variables, then validate it.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQ_SUSPEND_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new().merge(Toml::string(toml)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Hysteresis band is not inverted
    /// - Threshold target is positive
    /// - Scan has at least one point
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        match self.watcher.condition {
            ConditionConfig::Hysteresis {
                suspend_below,
                resume_above,
            } if suspend_below > resume_above => {
                return Err(ConfigError::Validation(format!(
                    "Inverted hysteresis band: suspend_below {suspend_below} > resume_above {resume_above}"
                )));
            }
            ConditionConfig::Below { min } if !min.is_finite() => {
                return Err(ConfigError::Validation(format!("Invalid minimum level {min}")));
            }
            _ => {}
        }

        if let Some(threshold) = &self.threshold {
            if threshold.target == 0 {
                return Err(ConfigError::Validation(
                    "Threshold target must be at least 1".to_string(),
                ));
            }
            if threshold.categories.as_ref().is_some_and(Vec::is_empty) {
                return Err(ConfigError::Validation(
                    "Threshold categories, when given, must not be empty".to_string(),
                ));
            }
        }

        if let Some(scan) = &self.scan {
            if scan.points == 0 {
                return Err(ConfigError::Validation(
                    "Scan needs at least one point".to_string(),
                ));
            }
        }

        Ok(())
    }
}
