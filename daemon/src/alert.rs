//! Hysteresis alerting for sustained resource usage

use crate::config::MonitorConfig;
use crate::registry::ProcessRecord;
use std::time::{Duration, Instant};

/// Per-process alert state.
///
/// `Normal` is both the initial state and the state reached on recovery.
/// An active alert always carries the start of its exceedance episode, so an
/// alert can never be active without the process also exceeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertState {
    #[default]
    Normal,
    Exceeding {
        since: Instant,
    },
    Active {
        since: Instant,
        alert_started: Instant,
    },
}

impl AlertState {
    pub fn exceeding(&self) -> bool {
        !matches!(self, AlertState::Normal)
    }

    pub fn alert_active(&self) -> bool {
        matches!(self, AlertState::Active { .. })
    }

    pub fn first_exceeded_at(&self) -> Option<Instant> {
        match *self {
            AlertState::Normal => None,
            AlertState::Exceeding { since } | AlertState::Active { since, .. } => Some(since),
        }
    }

    pub fn alert_started_at(&self) -> Option<Instant> {
        match *self {
            AlertState::Active { alert_started, .. } => Some(alert_started),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AlertState::Normal => "normal",
            AlertState::Exceeding { .. } => "exceeding",
            AlertState::Active { .. } => "alert_active",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertReason {
    CpuHigh,
    MemoryHigh,
}

/// Outcome of a state change that callers need to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertTransition {
    /// Entered `Active`; lists every threshold breached at that moment.
    Raised(Vec<AlertReason>),
    /// Left `Active`.
    Cleared,
}

/// Thresholds and debounce window taken from one config generation.
#[derive(Debug, Clone, Copy)]
pub struct AlertPolicy {
    pub cpu_threshold_percent: f64,
    pub memory_threshold_percent: f64,
    pub duration: Duration,
}

impl From<&MonitorConfig> for AlertPolicy {
    fn from(config: &MonitorConfig) -> Self {
        AlertPolicy {
            cpu_threshold_percent: config.cpu_threshold_percent,
            memory_threshold_percent: config.memory_threshold_percent,
            duration: Duration::from_secs(config.alert_duration_seconds),
        }
    }
}

impl AlertPolicy {
    pub fn cpu_exceeded(&self, record: &ProcessRecord) -> bool {
        record.cpu_percent > self.cpu_threshold_percent
    }

    pub fn memory_exceeded(&self, record: &ProcessRecord) -> bool {
        record.memory_percent > self.memory_threshold_percent
    }

    /// Advance `record` by one cycle observed at `now`.
    pub fn evaluate(&self, record: &mut ProcessRecord, now: Instant) -> Option<AlertTransition> {
        let was_active = record.alert.alert_active();

        if record.whitelisted {
            record.alert = AlertState::Normal;
            return was_active.then_some(AlertTransition::Cleared);
        }

        let cpu = self.cpu_exceeded(record);
        let memory = self.memory_exceeded(record);
        if !cpu && !memory {
            record.alert = AlertState::Normal;
            return was_active.then_some(AlertTransition::Cleared);
        }

        match record.alert {
            AlertState::Normal => {
                record.alert = AlertState::Exceeding { since: now };
                None
            }
            AlertState::Exceeding { since } => {
                if now.saturating_duration_since(since) < self.duration {
                    return None;
                }
                record.alert = AlertState::Active { since, alert_started: now };
                let mut reasons = Vec::with_capacity(2);
                if cpu {
                    reasons.push(AlertReason::CpuHigh);
                }
                if memory {
                    reasons.push(AlertReason::MemoryHigh);
                }
                Some(AlertTransition::Raised(reasons))
            }
            AlertState::Active { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(duration_secs: u64) -> AlertPolicy {
        AlertPolicy {
            cpu_threshold_percent: 90.0,
            memory_threshold_percent: 50.0,
            duration: Duration::from_secs(duration_secs),
        }
    }

    fn record(cpu: f64, memory: f64) -> ProcessRecord {
        let mut r = ProcessRecord::new(100, "worker".to_string(), false);
        r.cpu_percent = cpu;
        r.memory_percent = memory;
        r
    }

    #[test]
    fn test_end_to_end_debounce() {
        let policy = policy(10);
        let t0 = Instant::now();
        let mut r = record(95.0, 1.0);

        assert_eq!(policy.evaluate(&mut r, t0), None);
        assert_eq!(r.alert, AlertState::Exceeding { since: t0 });

        assert_eq!(policy.evaluate(&mut r, t0 + Duration::from_secs(5)), None);
        assert!(!r.alert.alert_active());

        let t10 = t0 + Duration::from_secs(10);
        assert_eq!(
            policy.evaluate(&mut r, t10),
            Some(AlertTransition::Raised(vec![AlertReason::CpuHigh]))
        );
        assert_eq!(r.alert.alert_started_at(), Some(t10));
        assert_eq!(r.alert.first_exceeded_at(), Some(t0));

        assert_eq!(policy.evaluate(&mut r, t0 + Duration::from_secs(15)), None);
        assert!(r.alert.alert_active());
    }

    #[test]
    fn test_recovery_before_duration_is_silent() {
        let policy = policy(10);
        let t0 = Instant::now();
        let mut r = record(95.0, 0.0);
        policy.evaluate(&mut r, t0);
        r.cpu_percent = 10.0;
        assert_eq!(policy.evaluate(&mut r, t0 + Duration::from_secs(5)), None);
        assert_eq!(r.alert, AlertState::Normal);
        assert_eq!(r.alert.first_exceeded_at(), None);

        // a new episode restarts the window
        r.cpu_percent = 95.0;
        let t8 = t0 + Duration::from_secs(8);
        policy.evaluate(&mut r, t8);
        assert_eq!(policy.evaluate(&mut r, t0 + Duration::from_secs(12)), None);
        assert_eq!(r.alert.first_exceeded_at(), Some(t8));
    }

    #[test]
    fn test_both_reasons_and_clear() {
        let policy = policy(0);
        let t0 = Instant::now();
        let mut r = record(99.0, 75.0);
        policy.evaluate(&mut r, t0);
        assert_eq!(
            policy.evaluate(&mut r, t0),
            Some(AlertTransition::Raised(vec![AlertReason::CpuHigh, AlertReason::MemoryHigh]))
        );

        // still over memory only: stays active
        r.cpu_percent = 1.0;
        assert_eq!(policy.evaluate(&mut r, t0 + Duration::from_secs(1)), None);
        assert!(r.alert.alert_active());

        r.memory_percent = 1.0;
        assert_eq!(
            policy.evaluate(&mut r, t0 + Duration::from_secs(2)),
            Some(AlertTransition::Cleared)
        );
        assert_eq!(r.alert, AlertState::Normal);
    }

    #[test]
    fn test_whitelisted_never_alerts() {
        let policy = policy(0);
        let t0 = Instant::now();
        let mut r = record(400.0, 100.0);
        r.whitelisted = true;
        for step in 0..5 {
            assert_eq!(policy.evaluate(&mut r, t0 + Duration::from_secs(step)), None);
            assert!(!r.alert.alert_active());
            assert!(!r.alert.exceeding());
        }
    }

    #[test]
    fn test_whitelisting_active_alert_clears_it() {
        let policy = policy(0);
        let t0 = Instant::now();
        let mut r = record(99.0, 0.0);
        policy.evaluate(&mut r, t0);
        policy.evaluate(&mut r, t0);
        assert!(r.alert.alert_active());
        r.whitelisted = true;
        assert_eq!(policy.evaluate(&mut r, t0), Some(AlertTransition::Cleared));
    }

    #[test]
    fn test_threshold_is_strict() {
        let policy = policy(0);
        let t0 = Instant::now();
        let mut r = record(90.0, 50.0);
        policy.evaluate(&mut r, t0);
        assert_eq!(r.alert, AlertState::Normal);
    }
}
