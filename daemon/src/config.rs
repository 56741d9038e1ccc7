//! Configuration management (TOML)

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const MIN_INTERVAL_SECS: u64 = 1;
pub const MAX_INTERVAL_SECS: u64 = 3600;

/// Thresholds and timing the monitor core runs with.
///
/// The monitor never mutates a config in place; updates replace the whole
/// value and take effect on the next cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub cpu_threshold_percent: f64,
    pub memory_threshold_percent: f64,
    pub interval_seconds: u64,
    /// How long a process must stay over a threshold before an alert fires.
    pub alert_duration_seconds: u64,
    pub whitelist: BTreeSet<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            cpu_threshold_percent: 90.0,
            memory_threshold_percent: 80.0,
            interval_seconds: 10,
            alert_duration_seconds: 60,
            whitelist: BTreeSet::new(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_interval(self.interval_seconds)?;
        for (name, value) in [
            ("cpu", self.cpu_threshold_percent),
            ("memory", self.memory_threshold_percent),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }

    pub fn is_whitelisted(&self, name: &str) -> bool {
        self.whitelist.contains(name)
    }
}

pub fn validate_interval(seconds: u64) -> Result<(), ConfigError> {
    if (MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&seconds) {
        Ok(())
    } else {
        Err(ConfigError::IntervalOutOfRange(seconds))
    }
}

/// On-disk daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub autostart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    /// Seconds between status broadcasts to connected clients.
    pub status_interval_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            autostart: true,
            socket_path: None,
            status_interval_seconds: 10,
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        config.monitor.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "procmon")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_bounds() {
        assert!(validate_interval(1).is_ok());
        assert!(validate_interval(3600).is_ok());
        assert_eq!(validate_interval(0), Err(ConfigError::IntervalOutOfRange(0)));
        assert_eq!(validate_interval(3601), Err(ConfigError::IntervalOutOfRange(3601)));
    }

    #[test]
    fn test_rejects_nan_threshold() {
        let config = MonitorConfig { cpu_threshold_percent: f64::NAN, ..Default::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { name: "cpu", .. })
        ));
    }

    #[test]
    fn test_whitelist_is_exact_match() {
        let mut config = MonitorConfig::default();
        config.whitelist.insert("firefox".to_string());
        assert!(config.is_whitelisted("firefox"));
        assert!(!config.is_whitelisted("firefox-esr"));
    }
}
