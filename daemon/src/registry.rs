//! Registry of live processes, reconciled once per cycle

use crate::alert::AlertState;
use crate::config::MonitorConfig;
use crate::error::RegistryError;
use std::collections::{HashMap, HashSet};

/// Everything the monitor knows about one live process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    /// Start time in ticks since boot; tells a recycled pid apart.
    pub start_ticks: u64,
    /// CPU usage over the last poll interval; may exceed 100 on multi-core hosts.
    pub cpu_percent: f64,
    pub lifetime_cpu_percent: f64,
    pub memory_percent: f64,
    pub whitelisted: bool,
    pub alert: AlertState,
}

impl ProcessRecord {
    pub fn new(pid: u32, name: String, whitelisted: bool) -> Self {
        Self {
            pid,
            name,
            start_ticks: 0,
            cpu_percent: 0.0,
            lifetime_cpu_percent: 0.0,
            memory_percent: 0.0,
            whitelisted,
            alert: AlertState::Normal,
        }
    }

    fn refresh(&mut self, obs: &ProcessObservation, whitelisted: bool) {
        self.name.clone_from(&obs.name);
        self.start_ticks = obs.start_ticks;
        self.cpu_percent = obs.cpu_percent;
        self.lifetime_cpu_percent = obs.lifetime_cpu_percent;
        self.memory_percent = obs.memory_percent;
        self.whitelisted = whitelisted;
    }
}

/// Metrics gathered for one pid during the lock-free sampling phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessObservation {
    pub pid: u32,
    pub name: String,
    pub start_ticks: u64,
    pub cpu_percent: f64,
    pub lifetime_cpu_percent: f64,
    pub memory_percent: f64,
}

/// Lifecycle changes produced by one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reconciliation {
    pub created: Vec<u32>,
    /// `(pid, previous name)` for pids now owned by a different process.
    /// Each of these pids is also listed in `created`.
    pub recycled: Vec<(u32, String)>,
    /// `(pid, last known name)` of removed records, ordered by pid.
    pub terminated: Vec<(u32, String)>,
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    records: HashMap<u32, ProcessRecord>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessRecord> {
        self.records.get(&pid)
    }

    pub fn records(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut ProcessRecord> {
        self.records.values_mut()
    }

    /// Copies of every record, ordered by pid.
    pub fn snapshot(&self) -> Vec<ProcessRecord> {
        let mut out: Vec<ProcessRecord> = self.records.values().cloned().collect();
        out.sort_unstable_by_key(|r| r.pid);
        out
    }

    /// Mark-and-sweep against this cycle's observations.
    ///
    /// Observed pids are created or refreshed (alert state is carried over
    /// untouched); records whose pid was not observed are removed. A pid
    /// whose start time changed belongs to a new process and gets a fresh
    /// record. If the map cannot grow, nothing is modified.
    pub fn reconcile(
        &mut self,
        observations: &[ProcessObservation],
        config: &MonitorConfig,
    ) -> Result<Reconciliation, RegistryError> {
        let new_count = observations
            .iter()
            .filter(|o| !self.records.contains_key(&o.pid))
            .count();
        self.records.try_reserve(new_count)?;
        let mut touched: HashSet<u32> = HashSet::new();
        touched.try_reserve(observations.len())?;

        let mut outcome = Reconciliation::default();
        for obs in observations {
            let whitelisted = config.is_whitelisted(&obs.name);
            touched.insert(obs.pid);
            if let Some(record) = self.records.get_mut(&obs.pid) {
                if record.start_ticks == obs.start_ticks {
                    record.refresh(obs, whitelisted);
                    continue;
                }
                // The previous owner exited between cycles.
                outcome.recycled.push((obs.pid, std::mem::take(&mut record.name)));
            }
            let mut record = ProcessRecord::new(obs.pid, obs.name.clone(), whitelisted);
            record.refresh(obs, whitelisted);
            self.records.insert(obs.pid, record);
            outcome.created.push(obs.pid);
        }

        let mut gone: Vec<u32> = self
            .records
            .keys()
            .filter(|pid| !touched.contains(pid))
            .copied()
            .collect();
        gone.sort_unstable();
        for pid in gone {
            if let Some(record) = self.records.remove(&pid) {
                outcome.terminated.push((pid, record.name));
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn obs(pid: u32, name: &str, cpu: f64) -> ProcessObservation {
        ProcessObservation {
            pid,
            name: name.to_string(),
            start_ticks: 0,
            cpu_percent: cpu,
            lifetime_cpu_percent: cpu / 2.0,
            memory_percent: 1.0,
        }
    }

    #[test]
    fn test_created_then_terminated() {
        let config = MonitorConfig::default();
        let mut registry = ProcessRegistry::new();

        let first = registry.reconcile(&[obs(1, "init", 0.0), obs(2, "sh", 1.0)], &config).unwrap();
        assert_eq!(first.created, vec![1, 2]);
        assert!(first.terminated.is_empty());

        let second = registry.reconcile(&[obs(1, "init", 0.5), obs(3, "cat", 0.0)], &config).unwrap();
        assert_eq!(second.created, vec![3]);
        assert_eq!(second.terminated, vec![(2, "sh".to_string())]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).unwrap().cpu_percent, 0.5);
    }

    #[test]
    fn test_refresh_preserves_alert_state() {
        let config = MonitorConfig::default();
        let mut registry = ProcessRegistry::new();
        registry.reconcile(&[obs(5, "busy", 99.0)], &config).unwrap();

        let since = Instant::now();
        let state = AlertState::Active { since, alert_started: since };
        registry.records_mut().for_each(|r| r.alert = state);

        registry.reconcile(&[obs(5, "busy", 10.0)], &config).unwrap();
        let record = registry.get(5).unwrap();
        assert_eq!(record.alert, state);
        assert_eq!(record.cpu_percent, 10.0);
    }

    #[test]
    fn test_whitelist_flag_follows_config() {
        let mut config = MonitorConfig::default();
        let mut registry = ProcessRegistry::new();
        registry.reconcile(&[obs(8, "backup", 0.0)], &config).unwrap();
        assert!(!registry.get(8).unwrap().whitelisted);

        config.whitelist.insert("backup".to_string());
        registry.reconcile(&[obs(8, "backup", 0.0)], &config).unwrap();
        assert!(registry.get(8).unwrap().whitelisted);
    }

    #[test]
    fn test_recycled_pid_gets_fresh_record() {
        let config = MonitorConfig::default();
        let mut registry = ProcessRegistry::new();
        registry.reconcile(&[obs(40, "old", 95.0)], &config).unwrap();
        let since = Instant::now();
        registry.records_mut().for_each(|r| r.alert = AlertState::Exceeding { since });

        let reborn = ProcessObservation { start_ticks: 5000, ..obs(40, "new", 95.0) };
        let out = registry.reconcile(&[reborn], &config).unwrap();
        assert_eq!(out.recycled, vec![(40, "old".to_string())]);
        assert_eq!(out.created, vec![40]);
        assert!(out.terminated.is_empty());

        let record = registry.get(40).unwrap();
        assert_eq!(record.name, "new");
        assert_eq!(record.start_ticks, 5000);
        assert_eq!(record.alert, AlertState::Normal);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_is_ordered_copy() {
        let config = MonitorConfig::default();
        let mut registry = ProcessRegistry::new();
        registry
            .reconcile(&[obs(30, "c", 0.0), obs(10, "a", 0.0), obs(20, "b", 0.0)], &config)
            .unwrap();
        let mut snap = registry.snapshot();
        let pids: Vec<u32> = snap.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![10, 20, 30]);

        snap[0].name = "changed".to_string();
        assert_eq!(registry.get(10).unwrap().name, "a");
    }

    #[test]
    fn test_empty_enumeration_sweeps_everything() {
        let config = MonitorConfig::default();
        let mut registry = ProcessRegistry::new();
        registry.reconcile(&[obs(1, "a", 0.0), obs(2, "b", 0.0)], &config).unwrap();
        let out = registry.reconcile(&[], &config).unwrap();
        assert_eq!(out.terminated.len(), 2);
        assert!(registry.is_empty());
    }
}
