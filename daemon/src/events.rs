//! Monitor event delivery

use crate::registry::ProcessRecord;

/// Something the monitor reports after a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    ProcessCreated(ProcessRecord),
    ProcessTerminated { pid: u32, name: String },
    HighCpu(ProcessRecord),
    HighMemory(ProcessRecord),
    AlertCleared(ProcessRecord),
}

impl MonitorEvent {
    pub fn pid(&self) -> u32 {
        match self {
            MonitorEvent::ProcessCreated(r)
            | MonitorEvent::HighCpu(r)
            | MonitorEvent::HighMemory(r)
            | MonitorEvent::AlertCleared(r) => r.pid,
            MonitorEvent::ProcessTerminated { pid, .. } => *pid,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::ProcessCreated(_) => "process_created",
            MonitorEvent::ProcessTerminated { .. } => "process_terminated",
            MonitorEvent::HighCpu(_) => "high_cpu",
            MonitorEvent::HighMemory(_) => "high_memory",
            MonitorEvent::AlertCleared(_) => "alert_cleared",
        }
    }
}

/// Receiver for monitor callbacks.
///
/// Every method defaults to doing nothing, so implementors only override
/// what they care about. Methods run synchronously on the monitor worker;
/// a slow implementation delays the next cycle.
pub trait EventSink: Send + Sync {
    fn process_created(&self, _record: &ProcessRecord) {}

    fn process_terminated(&self, _pid: u32, _name: &str) {}

    fn high_cpu(&self, _record: &ProcessRecord) {}

    fn high_memory(&self, _record: &ProcessRecord) {}

    fn alert_cleared(&self, _record: &ProcessRecord) {}

    fn dispatch(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::ProcessCreated(r) => self.process_created(r),
            MonitorEvent::ProcessTerminated { pid, name } => self.process_terminated(*pid, name),
            MonitorEvent::HighCpu(r) => self.high_cpu(r),
            MonitorEvent::HighMemory(r) => self.high_memory(r),
            MonitorEvent::AlertCleared(r) => self.alert_cleared(r),
        }
    }
}

pub struct NoopSink;

impl EventSink for NoopSink {}
