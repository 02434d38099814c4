use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sp_core::PlayerError;

use crate::context::DEFAULT_MAX_CALL_STACK_DEPTH;

/// What a second `play` does while one is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrentPlayPolicy {
    #[default]
    Reject,
    Preempt,
}

/// How `Return` behaves with an empty call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnAtRoot {
    #[default]
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStrategy {
    Conservative,
    Aggressive,
    #[default]
    Balanced,
    TrendWeighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default_timeout_ms: u64,
    pub overrides: BTreeMap<String, u64>,
    pub adaptive: bool,
    pub strategy: TimeoutStrategy,
    pub multiplier: f64,
    pub min_samples: usize,
    pub min_factor: f64,
    pub max_factor: f64,
    pub history_size: usize,
    pub stale_history_secs: u64,
    pub stale_history_min_samples: usize,
    pub maintenance_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            overrides: BTreeMap::new(),
            adaptive: true,
            strategy: TimeoutStrategy::Balanced,
            multiplier: 1.5,
            min_samples: 10,
            min_factor: 0.5,
            max_factor: 5.0,
            history_size: 100,
            stale_history_secs: 24 * 60 * 60,
            stale_history_min_samples: 5,
            maintenance_interval_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn override_for(&self, kind: &str) -> Option<Duration> {
        self.overrides.get(kind).copied().map(Duration::from_millis)
    }

    pub fn stale_history_age(&self) -> Duration {
        Duration::from_secs(self.stale_history_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.default_timeout_ms == 0 {
            return Err(PlayerError::validation(
                "timeouts.default_timeout_ms must be positive",
            ));
        }
        if !(self.multiplier > 0.0) {
            return Err(PlayerError::validation("timeouts.multiplier must be positive"));
        }
        if !(self.min_factor > 0.0) || self.min_factor > self.max_factor {
            return Err(PlayerError::validation(
                "timeouts.min_factor must be positive and not above max_factor",
            ));
        }
        if self.history_size == 0 {
            return Err(PlayerError::validation(
                "timeouts.history_size must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub max_call_stack_depth: usize,
    pub continue_on_error: bool,
    pub max_preprocessing_errors: usize,
    pub pause_on_breakpoints: bool,
    pub line_delay_ms: u64,
    pub auto_save_interval_ms: Option<u64>,
    pub auto_save_key: String,
    pub max_fast_forward_speed: f64,
    pub concurrent_play: ConcurrentPlayPolicy,
    pub return_at_root: ReturnAtRoot,
    pub timeouts: TimeoutConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_call_stack_depth: DEFAULT_MAX_CALL_STACK_DEPTH,
            continue_on_error: true,
            max_preprocessing_errors: 100,
            pause_on_breakpoints: true,
            line_delay_ms: 0,
            auto_save_interval_ms: None,
            auto_save_key: "autosave".to_string(),
            max_fast_forward_speed: 8.0,
            concurrent_play: ConcurrentPlayPolicy::Reject,
            return_at_root: ReturnAtRoot::Complete,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl PlayerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, PlayerError> {
        let config: Self = toml::from_str(raw)
            .map_err(|error| PlayerError::validation(format!("invalid config: {}", error)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, PlayerError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            PlayerError::validation(format!(
                "cannot read config {}: {}",
                path.display(),
                error
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.max_call_stack_depth == 0 {
            return Err(PlayerError::validation(
                "max_call_stack_depth must be positive",
            ));
        }
        if !(self.max_fast_forward_speed >= 1.0) {
            return Err(PlayerError::validation(
                "max_fast_forward_speed must be at least 1.0",
            ));
        }
        if self.auto_save_key.trim().is_empty() {
            return Err(PlayerError::validation("auto_save_key must not be empty"));
        }
        self.timeouts.validate()
    }

    pub fn line_delay(&self) -> Duration {
        Duration::from_millis(self.line_delay_ms)
    }

    pub fn auto_save_interval(&self) -> Option<Duration> {
        self.auto_save_interval_ms.map(Duration::from_millis)
    }
}
