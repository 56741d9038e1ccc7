//! Kernel accounting reader (reads /proc on Linux)

mod linux;

pub use linux::{
    parse_meminfo_total_kb, parse_stat, parse_stat_name, parse_status_rss_kb, parse_uptime,
    ProcfsReader,
};

use crate::error::ReadError;

/// Names are truncated to this many bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Raw CPU accounting counters for one process, read fresh each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessAccountingSample {
    pub pid: u32,
    /// Accumulated user-mode ticks (`utime`).
    pub user_ticks: u64,
    /// Accumulated kernel-mode ticks (`stime`).
    pub kernel_ticks: u64,
    /// Process start time in ticks since boot (`starttime`).
    pub start_ticks: u64,
}

impl ProcessAccountingSample {
    pub fn total_ticks(&self) -> u64 {
        self.user_ticks.saturating_add(self.kernel_ticks)
    }
}

/// A display name, or a synthesized placeholder when no source could be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessName {
    Resolved(String),
    Placeholder(String),
}

impl ProcessName {
    pub fn resolved(name: &str) -> Self {
        ProcessName::Resolved(truncate_name(name))
    }

    pub fn placeholder(pid: u32) -> Self {
        ProcessName::Placeholder(format!("pid:{}", pid))
    }

    /// A placeholder usually means the process is exiting.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, ProcessName::Placeholder(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProcessName::Resolved(s) | ProcessName::Placeholder(s) => s,
        }
    }

    pub fn into_resolved(self) -> Option<String> {
        match self {
            ProcessName::Resolved(s) => Some(s),
            ProcessName::Placeholder(_) => None,
        }
    }
}

fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name.to_string();
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Source of per-process and system-wide accounting facts.
///
/// Every method is a read-only query against the kernel; none of them take
/// the monitor lock.
pub trait KernelReader: Send + Sync {
    /// Pids currently present in the process table.
    fn list_pids(&self) -> Vec<u32>;

    fn read_accounting(&self, pid: u32) -> Result<ProcessAccountingSample, ReadError>;

    fn read_process_name(&self, pid: u32) -> ProcessName;

    /// Resident memory as a percentage of total memory, in `[0, 100]`.
    /// Returns 0 when either figure is unavailable.
    fn read_memory_usage(&self, pid: u32) -> f64;

    /// Seconds since boot, or 0.0 when unavailable.
    fn read_system_uptime(&self) -> f64;

    /// Total system memory in kB, or 0 when unavailable.
    fn read_total_memory(&self) -> u64;

    fn online_cores(&self) -> u32;

    fn clock_ticks(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundary() {
        let long = "é".repeat(200);
        let name = ProcessName::resolved(&long);
        assert!(name.as_str().len() <= MAX_NAME_LEN);
        assert_eq!(name.as_str().len() % 2, 0);
    }

    #[test]
    fn test_placeholder_is_flagged() {
        let name = ProcessName::placeholder(42);
        assert!(name.is_placeholder());
        assert_eq!(name.as_str(), "pid:42");
        assert_eq!(name.into_resolved(), None);
    }
}
