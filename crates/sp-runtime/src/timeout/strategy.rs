use std::time::Duration;

use crate::config::{TimeoutConfig, TimeoutStrategy};

use super::history::ExecutionHistory;

fn raw_timeout_secs(strategy: TimeoutStrategy, multiplier: f64, history: &ExecutionHistory) -> f64 {
    match strategy {
        TimeoutStrategy::Conservative => history.percentile_secs(0.99) * multiplier * 1.2,
        TimeoutStrategy::Aggressive => history.percentile_secs(0.90) * multiplier * 0.9,
        TimeoutStrategy::Balanced => history.percentile_secs(0.95) * multiplier,
        TimeoutStrategy::TrendWeighted => {
            history.percentile_secs(0.95)
                * multiplier
                * history.trend_factor()
                * history.success_factor()
        }
    }
}

/// Statistical timeout for `history`, clamped to
/// `[base * min_factor, base * max_factor]`.
pub(crate) fn adaptive_timeout(
    config: &TimeoutConfig,
    base: Duration,
    history: &ExecutionHistory,
) -> Duration {
    let base_secs = base.as_secs_f64();
    let lower = base_secs * config.min_factor;
    let upper = base_secs * config.max_factor;
    let computed = raw_timeout_secs(config.strategy, config.multiplier, history);
    Duration::from_secs_f64(computed.clamp(lower, upper))
}
