//! CPU usage calculation from raw tick counters

use crate::collector::ProcessAccountingSample;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TickBaseline {
    user_ticks: u64,
    kernel_ticks: u64,
    start_ticks: u64,
}

impl From<&ProcessAccountingSample> for TickBaseline {
    fn from(sample: &ProcessAccountingSample) -> Self {
        TickBaseline {
            user_ticks: sample.user_ticks,
            kernel_ticks: sample.kernel_ticks,
            start_ticks: sample.start_ticks,
        }
    }
}

/// Turns successive accounting samples into CPU percentages.
///
/// Keeps the previous sample of every pid it has seen so interval usage can
/// be computed from tick deltas. The baselines live as long as the
/// calculator and are never persisted.
pub struct UsageCalculator {
    clock_ticks: u64,
    num_cpus: u32,
    baselines: HashMap<u32, TickBaseline>,
}

impl UsageCalculator {
    pub fn new(clock_ticks: u64, num_cpus: u32) -> Self {
        Self {
            clock_ticks: clock_ticks.max(1),
            num_cpus: num_cpus.max(1),
            baselines: HashMap::new(),
        }
    }

    /// Highest interval percentage that is physically possible.
    pub fn ceiling_percent(&self) -> f64 {
        self.num_cpus as f64 * 100.0
    }

    /// Average CPU percentage over the whole life of the process.
    ///
    /// Returns 0 when the process appears to have started after `uptime_secs`.
    pub fn lifetime_percent(&self, sample: &ProcessAccountingSample, uptime_secs: f64) -> f64 {
        let ticks = self.clock_ticks as f64;
        let process_uptime = uptime_secs - sample.start_ticks as f64 / ticks;
        if process_uptime <= 0.0 {
            return 0.0;
        }
        let cpu_secs = sample.total_ticks() as f64 / ticks;
        cpu_secs / process_uptime * 100.0
    }

    /// CPU percentage over the last `interval_secs`, recording `sample` as
    /// the new baseline.
    ///
    /// Falls back to [`lifetime_percent`](Self::lifetime_percent) when there
    /// is no usable baseline (first sighting, counters went backwards, or the
    /// pid was recycled) and when the result exceeds `cores × 100`.
    pub fn interval_percent(
        &mut self,
        sample: &ProcessAccountingSample,
        uptime_secs: f64,
        interval_secs: u64,
    ) -> f64 {
        let current = TickBaseline::from(sample);
        let previous = self.baselines.insert(sample.pid, current);

        let previous = match previous {
            Some(prev) if Self::is_continuation(&prev, &current) => prev,
            Some(_) => {
                debug!("pid {} counters reset, rebasing", sample.pid);
                return self.lifetime_percent(sample, uptime_secs);
            }
            None => return self.lifetime_percent(sample, uptime_secs),
        };
        if interval_secs == 0 {
            return self.lifetime_percent(sample, uptime_secs);
        }

        let delta = (current.user_ticks - previous.user_ticks)
            + (current.kernel_ticks - previous.kernel_ticks);
        let percent = delta as f64 / (self.clock_ticks as f64 * interval_secs as f64) * 100.0;

        if percent > self.ceiling_percent() {
            let fallback = self.lifetime_percent(sample, uptime_secs);
            warn!(
                "pid {} interval usage {:.1}% exceeds {} core ceiling, using lifetime {:.1}%",
                sample.pid, percent, self.num_cpus, fallback
            );
            return fallback;
        }
        percent
    }

    fn is_continuation(prev: &TickBaseline, current: &TickBaseline) -> bool {
        prev.start_ticks == current.start_ticks
            && current.user_ticks >= prev.user_ticks
            && current.kernel_ticks >= prev.kernel_ticks
    }

    /// Drop baselines for pids that are no longer alive.
    pub fn retain(&mut self, live_pids: &HashSet<u32>) {
        self.baselines.retain(|pid, _| live_pids.contains(pid));
    }

    pub fn has_baseline(&self, pid: u32) -> bool {
        self.baselines.contains_key(&pid)
    }

    /// Baseline counters `(user, kernel)` currently stored for `pid`.
    pub fn baseline(&self, pid: u32) -> Option<(u64, u64)> {
        self.baselines.get(&pid).map(|b| (b.user_ticks, b.kernel_ticks))
    }
}
