use std::fmt;
use std::time::Duration;

use sp_core::PlayerError;

use crate::registry::CommandMetadata;
use crate::rng::{seed_for, unit_interval};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    Retry { delay: Duration },
    Skip,
    Escalate,
}

/// Decides what happens after a command fails.
///
/// `attempt` counts the retries already made for this line, starting at 0.
pub trait ErrorRecoveryPolicy: Send + Sync + fmt::Debug {
    fn decide(
        &self,
        kind: &str,
        metadata: &CommandMetadata,
        error: &PlayerError,
        attempt: u32,
    ) -> RecoveryDecision;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt + 1`; jitter adds up to 25% and is
    /// reproducible for a given kind and attempt.
    pub fn delay_for(&self, kind: &str, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let cap = self.max_delay.as_secs_f64();
        let capped = base.min(cap);
        let delayed = if self.jitter {
            let mut state = seed_for(kind, attempt);
            capped + capped * 0.25 * unit_interval(&mut state)
        } else {
            capped
        };
        Duration::from_secs_f64(delayed.min(cap))
    }
}

/// Retry transient failures with backoff, skip non-critical permanent ones,
/// escalate everything else.
#[derive(Debug, Clone, Default)]
pub struct DefaultRecoveryPolicy {
    backoff: BackoffConfig,
}

impl DefaultRecoveryPolicy {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self { backoff }
    }
}

impl ErrorRecoveryPolicy for DefaultRecoveryPolicy {
    fn decide(
        &self,
        kind: &str,
        metadata: &CommandMetadata,
        error: &PlayerError,
        attempt: u32,
    ) -> RecoveryDecision {
        if matches!(error, PlayerError::Cancelled) {
            return RecoveryDecision::Escalate;
        }
        if error.is_retryable() && metadata.retryable {
            if attempt < metadata.max_retries {
                return RecoveryDecision::Retry {
                    delay: self.backoff.delay_for(kind, attempt),
                };
            }
            return RecoveryDecision::Escalate;
        }
        if metadata.critical {
            RecoveryDecision::Escalate
        } else {
            RecoveryDecision::Skip
        }
    }
}
