//! Monitor loop: sampling, reconciliation, alerting and event dispatch

use crate::alert::{AlertPolicy, AlertReason, AlertTransition};
use crate::collector::{KernelReader, ProcfsReader};
use crate::config::{validate_interval, MonitorConfig};
use crate::error::{ConfigError, MonitorError, ReadError};
use crate::events::{EventSink, MonitorEvent, NoopSink};
use crate::registry::{ProcessObservation, ProcessRecord, ProcessRegistry};
use crate::usage::UsageCalculator;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    Stopped,
    AlreadyStopped,
}

/// Aggregate counts over the current registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorStatistics {
    pub total: usize,
    pub over_cpu: usize,
    pub over_memory: usize,
    pub active_alerts: usize,
    pub running: bool,
    pub interval_seconds: u64,
}

/// State guarded by the monitor lock.
struct Control {
    registry: ProcessRegistry,
    config: Arc<MonitorConfig>,
    sink: Arc<dyn EventSink>,
    running: bool,
    stop_requested: bool,
    worker: Option<JoinHandle<()>>,
    /// Kept after `worker` is taken so a stop issued from an event sink can
    /// recognise the worker thread.
    worker_thread: Option<ThreadId>,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
    reader: Arc<dyn KernelReader>,
    calculator: Mutex<UsageCalculator>,
}

/// Periodic process monitor.
///
/// One background worker runs a cycle per poll interval. All other methods
/// may be called from any thread; they hold the lock only long enough to
/// read or swap state and never hand out references into the registry.
pub struct Monitor {
    shared: Arc<Shared>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, reader: Arc<dyn KernelReader>) -> Result<Self, ConfigError> {
        config.validate()?;
        let calculator = UsageCalculator::new(reader.clock_ticks(), reader.online_cores());
        let control = Control {
            registry: ProcessRegistry::new(),
            config: Arc::new(config),
            sink: Arc::new(NoopSink),
            running: false,
            stop_requested: false,
            worker: None,
            worker_thread: None,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                control: Mutex::new(control),
                wake: Condvar::new(),
                reader,
                calculator: Mutex::new(calculator),
            }),
        })
    }

    /// Monitor over the host's `/proc`.
    pub fn with_procfs(config: MonitorConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(ProcfsReader::new()))
    }

    /// Spawn the worker. Calling this while it already runs is harmless.
    pub fn start(&self) -> Result<StartStatus, MonitorError> {
        let mut control = self.shared.control.lock();
        if control.running {
            return Ok(StartStatus::AlreadyRunning);
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("procmon-worker".to_string())
            .spawn(move || shared.worker_loop())?;

        control.running = true;
        control.stop_requested = false;
        control.worker_thread = Some(handle.thread().id());
        control.worker = Some(handle);
        info!("Monitor started, interval {}s", control.config.interval_seconds);
        Ok(StartStatus::Started)
    }

    /// Ask the worker to exit and wait for it.
    ///
    /// The in-flight cycle always completes; the inter-cycle sleep is
    /// interrupted immediately.
    pub fn stop(&self) -> StopStatus {
        let handle = {
            let mut control = self.shared.control.lock();
            if !control.running {
                return StopStatus::AlreadyStopped;
            }
            control.stop_requested = true;
            self.shared.wake.notify_all();
            if control.worker_thread == Some(thread::current().id()) {
                // Called from an event sink on the worker itself; it exits
                // after this cycle.
                return StopStatus::Stopped;
            }
            control.worker.take()
        };

        match handle {
            Some(handle) => {
                if handle.join().is_err() {
                    error!("Monitor worker panicked");
                }
            }
            None => {
                let mut control = self.shared.control.lock();
                while control.running {
                    self.shared.wake.wait(&mut control);
                }
            }
        }
        info!("Monitor stopped");
        StopStatus::Stopped
    }

    pub fn is_running(&self) -> bool {
        self.shared.control.lock().running
    }

    /// Change the poll interval, effective from the next cycle.
    ///
    /// A sleeping worker re-arms its timer against the new interval.
    pub fn set_interval(&self, seconds: u64) -> Result<(), ConfigError> {
        validate_interval(seconds)?;
        let mut control = self.shared.control.lock();
        let mut next = (*control.config).clone();
        next.interval_seconds = seconds;
        control.config = Arc::new(next);
        self.shared.wake.notify_all();
        info!("Poll interval set to {}s", seconds);
        Ok(())
    }

    /// Replace the whole configuration, effective from the next cycle.
    pub fn update_config(&self, config: MonitorConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.shared.control.lock().config = Arc::new(config);
        self.shared.wake.notify_all();
        Ok(())
    }

    pub fn config(&self) -> Arc<MonitorConfig> {
        Arc::clone(&self.shared.control.lock().config)
    }

    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.shared.control.lock().sink = sink;
    }

    /// Copies of all records, ordered by pid.
    pub fn snapshot(&self) -> Vec<ProcessRecord> {
        self.shared.control.lock().registry.snapshot()
    }

    pub fn statistics(&self) -> MonitorStatistics {
        let control = self.shared.control.lock();
        let policy = AlertPolicy::from(control.config.as_ref());
        let mut stats = MonitorStatistics {
            total: control.registry.len(),
            over_cpu: 0,
            over_memory: 0,
            active_alerts: 0,
            running: control.running,
            interval_seconds: control.config.interval_seconds,
        };
        for record in control.registry.records() {
            stats.over_cpu += policy.cpu_exceeded(record) as usize;
            stats.over_memory += policy.memory_exceeded(record) as usize;
            stats.active_alerts += record.alert.alert_active() as usize;
        }
        stats
    }

    /// Run one cycle on the calling thread and return the events it dispatched.
    pub fn poll(&self) -> Vec<MonitorEvent> {
        self.shared.run_cycle(Instant::now())
    }

    /// Like [`poll`](Self::poll), with an explicit clock for alert timing.
    pub fn poll_at(&self, now: Instant) -> Vec<MonitorEvent> {
        self.shared.run_cycle(now)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Marks the monitor stopped when the worker exits, including by a panic
/// escaping an event sink.
struct WorkerExit<'a>(&'a Shared);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Monitor worker panicked, marking monitor stopped");
        }
        let mut control = self.0.control.lock();
        control.running = false;
        control.stop_requested = false;
        control.worker_thread = None;
        self.0.wake.notify_all();
    }
}

impl Shared {
    fn worker_loop(&self) {
        let _exit = WorkerExit(self);
        loop {
            self.run_cycle(Instant::now());
            if !self.sleep_until_next_cycle() {
                break;
            }
        }
    }

    /// Returns false once a stop has been requested.
    ///
    /// The deadline is recomputed on every wakeup so interval changes apply
    /// to the sleep already in progress.
    fn sleep_until_next_cycle(&self) -> bool {
        let mut control = self.control.lock();
        let slept_from = Instant::now();
        while !control.stop_requested {
            let deadline = slept_from + Duration::from_secs(control.config.interval_seconds);
            if Instant::now() >= deadline {
                break;
            }
            self.wake.wait_until(&mut control, deadline);
        }
        !control.stop_requested
    }

    fn run_cycle(&self, now: Instant) -> Vec<MonitorEvent> {
        let config = Arc::clone(&self.control.lock().config);
        let observations = self.sample(&config);

        let (events, sink) = {
            let mut control = self.control.lock();
            let reconciled = match control.registry.reconcile(&observations, &config) {
                Ok(reconciled) => reconciled,
                Err(e) => {
                    error!("Cycle abandoned, registry unchanged: {}", e);
                    return Vec::new();
                }
            };

            let policy = AlertPolicy::from(config.as_ref());
            let mut alerts = Vec::new();
            for record in control.registry.records_mut() {
                match policy.evaluate(record, now) {
                    Some(AlertTransition::Raised(reasons)) => {
                        warn!(
                            "Alert for {} (pid {}): cpu {:.1}%, memory {:.1}%",
                            record.name, record.pid, record.cpu_percent, record.memory_percent
                        );
                        for reason in reasons {
                            alerts.push(match reason {
                                AlertReason::CpuHigh => MonitorEvent::HighCpu(record.clone()),
                                AlertReason::MemoryHigh => MonitorEvent::HighMemory(record.clone()),
                            });
                        }
                    }
                    Some(AlertTransition::Cleared) => {
                        info!("Alert cleared for {} (pid {})", record.name, record.pid);
                        alerts.push(MonitorEvent::AlertCleared(record.clone()));
                    }
                    None => {}
                }
            }
            alerts.sort_by_key(MonitorEvent::pid);

            let mut events = Vec::with_capacity(
                reconciled.recycled.len()
                    + reconciled.created.len()
                    + alerts.len()
                    + reconciled.terminated.len(),
            );
            for (pid, name) in reconciled.recycled {
                debug!("pid {} recycled: {} replaced by a new process", pid, name);
                events.push(MonitorEvent::ProcessTerminated { pid, name });
            }
            for pid in &reconciled.created {
                if let Some(record) = control.registry.get(*pid) {
                    events.push(MonitorEvent::ProcessCreated(record.clone()));
                }
            }
            events.append(&mut alerts);
            for (pid, name) in reconciled.terminated {
                events.push(MonitorEvent::ProcessTerminated { pid, name });
            }
            (events, Arc::clone(&control.sink))
        };

        for event in &events {
            sink.dispatch(event);
        }
        debug!("Cycle complete: {} processes, {} events", observations.len(), events.len());
        events
    }

    /// Read and compute metrics for every visible process. Runs without the
    /// monitor lock.
    fn sample(&self, config: &MonitorConfig) -> Vec<ProcessObservation> {
        let pids = self.reader.list_pids();
        let uptime = self.reader.read_system_uptime();
        let mut observations = Vec::with_capacity(pids.len());
        let mut calculator = self.calculator.lock();

        for pid in pids {
            let name = match self.reader.read_process_name(pid).into_resolved() {
                Some(name) => name,
                None => {
                    debug!("Skipping pid {}: name unavailable", pid);
                    continue;
                }
            };
            let sample = match self.reader.read_accounting(pid) {
                Ok(sample) => sample,
                Err(ReadError::NotFound(_)) => continue,
                Err(e) => {
                    debug!("Skipping pid {}: {}", pid, e);
                    continue;
                }
            };
            let memory_percent = self.reader.read_memory_usage(pid);
            let lifetime_cpu_percent = calculator.lifetime_percent(&sample, uptime);
            let cpu_percent = calculator.interval_percent(&sample, uptime, config.interval_seconds);

            observations.push(ProcessObservation {
                pid,
                name,
                start_ticks: sample.start_ticks,
                cpu_percent,
                lifetime_cpu_percent,
                memory_percent,
            });
        }

        let live: HashSet<u32> = observations.iter().map(|o| o.pid).collect();
        calculator.retain(&live);
        observations
    }
}
