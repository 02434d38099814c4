mod history;
mod strategy;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sp_core::PlayerError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TimeoutConfig;

use history::ExecutionHistory;
use strategy::adaptive_timeout;

/// Summary of one command kind's execution history.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutStatistics {
    pub samples: usize,
    pub success_rate: f64,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub effective_timeout: Duration,
}

#[derive(Debug)]
struct ActiveTimeout {
    kind: String,
    deadline: Instant,
    token: CancellationToken,
}

/// Resolves per-kind timeouts and runs work inside a timeout boundary.
#[derive(Debug)]
pub struct TimeoutManager {
    config: TimeoutConfig,
    histories: Mutex<HashMap<String, ExecutionHistory>>,
    active: Mutex<HashMap<u64, ActiveTimeout>>,
    next_execution_id: AtomicU64,
    last_maintenance: Mutex<Instant>,
}

struct ActiveGuard<'a> {
    active: &'a Mutex<HashMap<u64, ActiveTimeout>>,
    id: u64,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.id);
    }
}

impl TimeoutManager {
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            histories: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            next_execution_id: AtomicU64::new(1),
            last_maintenance: Mutex::new(Instant::now()),
        }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Declared base, replaced by a configured override, then adapted from
    /// history once enough samples exist.
    pub fn get_timeout(&self, kind: &str, declared: Option<Duration>) -> Duration {
        let base = self
            .config
            .override_for(kind)
            .or(declared)
            .unwrap_or_else(|| self.config.default_timeout());
        if !self.config.adaptive {
            return base;
        }

        let histories = self.histories.lock();
        match histories.get(kind) {
            Some(history) if history.len() >= self.config.min_samples => {
                adaptive_timeout(&self.config, base, history)
            }
            _ => base,
        }
    }

    pub fn record(&self, kind: &str, duration: Duration, success: bool) {
        let capacity = self.config.history_size;
        self.histories
            .lock()
            .entry(kind.to_string())
            .or_insert_with(|| ExecutionHistory::new(capacity))
            .record(duration, success);
    }

    pub fn statistics(&self, kind: &str, declared: Option<Duration>) -> Option<TimeoutStatistics> {
        let (samples, success_rate, mean, p50, p95, p99) = {
            let histories = self.histories.lock();
            let history = histories.get(kind)?;
            (
                history.len(),
                history.success_rate(),
                history.mean_secs(),
                history.percentile_secs(0.5),
                history.percentile_secs(0.95),
                history.percentile_secs(0.99),
            )
        };
        Some(TimeoutStatistics {
            samples,
            success_rate,
            mean: Duration::from_secs_f64(mean),
            p50: Duration::from_secs_f64(p50),
            p95: Duration::from_secs_f64(p95),
            p99: Duration::from_secs_f64(p99),
            effective_timeout: self.get_timeout(kind, declared),
        })
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Runs `work` under a boundary that fires on the timeout or on `cancel`.
    ///
    /// The boundary token handed to `work` is a child of `cancel`. Every
    /// outcome is recorded in the kind's history.
    pub async fn execute_with_timeout<T, F, Fut>(
        &self,
        kind: &str,
        declared: Option<Duration>,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T, PlayerError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, PlayerError>>,
    {
        self.maintain();
        if cancel.is_cancelled() {
            return Err(PlayerError::Cancelled);
        }

        let timeout = self.get_timeout(kind, declared);
        let boundary = cancel.child_token();
        let id = self.next_execution_id.fetch_add(1, Ordering::Relaxed);
        self.active.lock().insert(
            id,
            ActiveTimeout {
                kind: kind.to_string(),
                deadline: Instant::now() + timeout,
                token: boundary.clone(),
            },
        );
        let _guard = ActiveGuard {
            active: &self.active,
            id,
        };

        let started = Instant::now();
        let timed_out = PlayerError::Timeout {
            kind: kind.to_string(),
            after: timeout,
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PlayerError::Cancelled),
            result = tokio::time::timeout(timeout, work(boundary.clone())) => match result {
                Ok(Err(PlayerError::Cancelled)) if !cancel.is_cancelled() => Err(timed_out),
                Ok(result) => result,
                Err(_) => Err(timed_out),
            },
        };
        boundary.cancel();

        let elapsed = started.elapsed();
        self.record(kind, elapsed, outcome.is_ok());
        if let Err(error) = &outcome {
            debug!(
                kind,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = timeout.as_millis() as u64,
                code = error.code(),
                "command execution failed inside timeout boundary"
            );
        }
        outcome
    }

    /// Cancels and drops active boundaries whose deadline has passed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut active = self.active.lock();
        let expired: Vec<u64> = active
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(entry) = active.remove(id) {
                warn!(kind = %entry.kind, "sweeping expired timeout boundary");
                entry.token.cancel();
            }
        }
        expired.len()
    }

    /// Drops histories that are both old and too small to be useful.
    pub fn evict_stale_history(&self) -> usize {
        let max_age = self.config.stale_history_age();
        let min_samples = self.config.stale_history_min_samples;
        let mut histories = self.histories.lock();
        let before = histories.len();
        histories.retain(|_, history| {
            history.last_updated().elapsed() <= max_age || history.len() >= min_samples
        });
        before - histories.len()
    }

    /// Runs both cleanups when the maintenance interval has elapsed.
    pub fn maintain(&self) -> bool {
        {
            let mut last = self.last_maintenance.lock();
            if last.elapsed() < self.config.maintenance_interval() {
                return false;
            }
            *last = Instant::now();
        }
        let swept = self.sweep_expired();
        let evicted = self.evict_stale_history();
        if swept > 0 || evicted > 0 {
            debug!(swept, evicted, "timeout maintenance");
        }
        true
    }

    pub fn spawn_maintenance(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = self.config.maintenance_interval().max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.maintain();
                    }
                }
            }
        })
    }
}
