//! Error types for the monitor core

use std::collections::TryReserveError;
use thiserror::Error;

/// Failure to read a process accounting record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// The process exited between enumeration and the read.
    #[error("process {0} not found")]
    NotFound(u32),

    #[error("malformed stat record for process {pid}: {reason}")]
    Malformed { pid: u32, reason: String },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry storage exhausted: {0}")]
    StorageExhausted(#[from] TryReserveError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("poll interval {0}s outside allowed range [{min}, {max}]", min = crate::config::MIN_INTERVAL_SECS, max = crate::config::MAX_INTERVAL_SECS)]
    IntervalOutOfRange(u64),

    #[error("invalid {name} threshold: {value}")]
    InvalidThreshold { name: &'static str, value: f64 },
}

/// Errors surfaced by monitor control operations.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("failed to spawn monitor worker: {0}")]
    Spawn(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_error_wraps_spawn_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::WouldBlock, "no threads left");
        let err = MonitorError::from(io);
        assert!(matches!(err, MonitorError::Spawn(_)));
        assert_eq!(err.to_string(), "failed to spawn monitor worker: no threads left");
    }
}
