use super::{KernelReader, ProcessAccountingSample, ProcessName};
use crate::error::ReadError;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

// Field offsets counted from the first token after the closing ')' of the
// comm field. The state letter (field 3 in proc(5)) is offset 0.
const UTIME_OFFSET: usize = 11;
const STIME_OFFSET: usize = 12;
const STARTTIME_OFFSET: usize = 19;

const FALLBACK_CLOCK_TICKS: u64 = 100;

pub struct ProcfsReader {
    root: PathBuf,
    clock_ticks: u64,
    num_cpus: u32,
}

impl ProcfsReader {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Reader over an alternative procfs tree (containers, tests).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        let num_cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        Self {
            root: root.into(),
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { FALLBACK_CLOCK_TICKS },
            num_cpus: num_cpus.max(1) as u32,
        }
    }

    fn pid_file(&self, pid: u32, file: &str) -> PathBuf {
        self.root.join(pid.to_string()).join(file)
    }
}

impl Default for ProcfsReader {
    fn default() -> Self { Self::new() }
}

/// Parse the counters we need out of a `/proc/<pid>/stat` line.
///
/// The comm field may itself contain spaces and parentheses, so fields are
/// located relative to the *last* `)` in the line.
pub fn parse_stat(pid: u32, line: &str) -> Result<ProcessAccountingSample, ReadError> {
    let malformed = |reason: &str| ReadError::Malformed { pid, reason: reason.to_string() };

    let close = line.rfind(')').ok_or_else(|| malformed("missing comm terminator"))?;
    let fields: Vec<&str> = line[close + 1..].split_whitespace().collect();
    if fields.len() <= STARTTIME_OFFSET {
        return Err(malformed("too few fields"));
    }

    let field = |offset: usize, name: &str| -> Result<u64, ReadError> {
        fields[offset].parse().map_err(|_| malformed(name))
    };

    Ok(ProcessAccountingSample {
        pid,
        user_ticks: field(UTIME_OFFSET, "utime")?,
        kernel_ticks: field(STIME_OFFSET, "stime")?,
        start_ticks: field(STARTTIME_OFFSET, "starttime")?,
    })
}

/// The parenthesised comm field of a stat line.
pub fn parse_stat_name(line: &str) -> Option<&str> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    if close <= open {
        return None;
    }
    Some(&line[open + 1..close])
}

fn parse_kb_field(content: &str, label: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix(label))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}

/// `VmRSS` from `/proc/<pid>/status`, in kB. Kernel threads have none.
pub fn parse_status_rss_kb(content: &str) -> Option<u64> {
    parse_kb_field(content, "VmRSS:")
}

pub fn parse_meminfo_total_kb(content: &str) -> Option<u64> {
    parse_kb_field(content, "MemTotal:")
}

/// First value of `/proc/uptime`.
pub fn parse_uptime(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

impl KernelReader for ProcfsReader {
    fn list_pids(&self) -> Vec<u32> {
        let mut pids = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(pid) = name.parse::<u32>() {
                        pids.push(pid);
                    }
                }
            }
        }
        pids
    }

    fn read_accounting(&self, pid: u32) -> Result<ProcessAccountingSample, ReadError> {
        let content = fs::read_to_string(self.pid_file(pid, "stat"))
            .map_err(|_| ReadError::NotFound(pid))?;
        parse_stat(pid, &content)
    }

    fn read_process_name(&self, pid: u32) -> ProcessName {
        if let Ok(comm) = fs::read_to_string(self.pid_file(pid, "comm")) {
            let comm = comm.trim_end_matches('\n');
            if !comm.is_empty() {
                return ProcessName::resolved(comm);
            }
        }
        if let Ok(stat) = fs::read_to_string(self.pid_file(pid, "stat")) {
            if let Some(name) = parse_stat_name(&stat).filter(|n| !n.is_empty()) {
                return ProcessName::resolved(name);
            }
        }
        ProcessName::placeholder(pid)
    }

    fn read_memory_usage(&self, pid: u32) -> f64 {
        let total_kb = self.read_total_memory();
        if total_kb == 0 {
            return 0.0;
        }
        let rss_kb = match fs::read_to_string(self.pid_file(pid, "status"))
            .ok()
            .as_deref()
            .and_then(parse_status_rss_kb)
        {
            Some(kb) => kb,
            None => return 0.0,
        };

        let percent = rss_kb as f64 / total_kb as f64 * 100.0;
        if percent > 100.0 {
            debug!("pid {} rss {} kB exceeds total {} kB, clamping", pid, rss_kb, total_kb);
            return 100.0;
        }
        percent
    }

    fn read_system_uptime(&self) -> f64 {
        fs::read_to_string(self.root.join("uptime"))
            .ok()
            .as_deref()
            .and_then(parse_uptime)
            .unwrap_or(0.0)
    }

    fn read_total_memory(&self) -> u64 {
        fs::read_to_string(self.root.join("meminfo"))
            .ok()
            .as_deref()
            .and_then(parse_meminfo_total_kb)
            .unwrap_or(0)
    }

    fn online_cores(&self) -> u32 {
        self.num_cpus
    }

    fn clock_ticks(&self) -> u64 {
        self.clock_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "1234 (my (odd) proc) S 1 1234 1234 0 -1 4194560 500 0 0 0 \
                        250 75 0 0 20 0 4 0 98765 123456789 2048 18446744073709551615";

    #[test]
    fn test_parse_stat_with_parenthesised_name() {
        let sample = parse_stat(1234, STAT).unwrap();
        assert_eq!(sample.user_ticks, 250);
        assert_eq!(sample.kernel_ticks, 75);
        assert_eq!(sample.start_ticks, 98765);
        assert_eq!(sample.total_ticks(), 325);
        assert_eq!(parse_stat_name(STAT), Some("my (odd) proc"));
    }

    #[test]
    fn test_parse_stat_rejects_truncated_line() {
        let err = parse_stat(7, "7 (sh) S 1 2 3").unwrap_err();
        assert!(matches!(err, ReadError::Malformed { pid: 7, .. }));
        assert!(parse_stat(7, "no parens here").is_err());
    }

    #[test]
    fn test_parse_labeled_fields() {
        let status = "Name:\tbash\nVmPeak:\t  9000 kB\nVmRSS:\t    4096 kB\n";
        assert_eq!(parse_status_rss_kb(status), Some(4096));
        assert_eq!(parse_status_rss_kb("Name:\tkthreadd\n"), None);

        let meminfo = "MemTotal:       16384000 kB\nMemFree:         1000 kB\n";
        assert_eq!(parse_meminfo_total_kb(meminfo), Some(16_384_000));
    }

    #[test]
    fn test_parse_uptime() {
        assert_eq!(parse_uptime("3600.25 7000.00\n"), Some(3600.25));
        assert_eq!(parse_uptime(""), None);
    }
}
