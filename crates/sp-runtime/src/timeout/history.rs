use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Sample {
    pub(crate) duration: Duration,
    pub(crate) success: bool,
}

/// Rolling execution history for one command kind.
#[derive(Debug, Clone)]
pub(crate) struct ExecutionHistory {
    samples: VecDeque<Sample>,
    capacity: usize,
    last_updated: Instant,
}

impl ExecutionHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            last_updated: Instant::now(),
        }
    }

    pub(crate) fn record(&mut self, duration: Duration, success: bool) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { duration, success });
        self.last_updated = Instant::now();
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn last_updated(&self) -> Instant {
        self.last_updated
    }

    pub(crate) fn success_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 1.0;
        }
        let successes = self.samples.iter().filter(|sample| sample.success).count();
        successes as f64 / self.samples.len() as f64
    }

    pub(crate) fn mean_secs(&self) -> f64 {
        mean_secs(self.samples.iter())
    }

    /// Nearest-rank percentile over the durations, `p` in `0.0..=1.0`.
    pub(crate) fn percentile_secs(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self
            .samples
            .iter()
            .map(|sample| sample.duration.as_secs_f64())
            .collect();
        sorted.sort_by(f64::total_cmp);
        let rank = (p.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }

    /// Ratio of the recent half's mean to the earlier half's, in `1.0..=2.0`.
    /// Only a slowdown raises the factor.
    pub(crate) fn trend_factor(&self) -> f64 {
        let half = self.samples.len() / 2;
        if half == 0 {
            return 1.0;
        }
        let earlier = mean_secs(self.samples.iter().take(half));
        let recent = mean_secs(self.samples.iter().skip(self.samples.len() - half));
        if earlier <= f64::EPSILON {
            return 1.0;
        }
        (recent / earlier).clamp(1.0, 2.0)
    }

    pub(crate) fn success_factor(&self) -> f64 {
        let rate = self.success_rate();
        if rate < 0.9 {
            1.0 + (0.9 - rate)
        } else {
            1.0
        }
    }
}

fn mean_secs<'a>(samples: impl Iterator<Item = &'a Sample>) -> f64 {
    let (total, count) = samples.fold((0.0, 0usize), |(total, count), sample| {
        (total + sample.duration.as_secs_f64(), count + 1)
    });
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}
