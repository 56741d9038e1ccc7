//! IPC protocol definitions (JSON messages)

use crate::events::MonitorEvent;
use crate::monitor::MonitorStatistics;
use crate::registry::ProcessRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    ListProcesses,
    GetStatistics,
    GetConfig,
    SetInterval { params: SetIntervalParams },
    AddWhitelist { params: WhitelistParams },
    RemoveWhitelist { params: WhitelistParams },
    PauseMonitoring,
    ResumeMonitoring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetIntervalParams {
    pub seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitelistParams {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Response { id: Option<String>, data: serde_json::Value },
    Event { data: EventData },
    Status { data: StatusData },
}

impl Response {
    pub fn data(data: serde_json::Value) -> Self {
        Response::Response { id: None, data }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::data(serde_json::json!({ "error": message.to_string() }))
    }

    pub fn success() -> Self {
        Self::data(serde_json::json!({ "success": true }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessData {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub lifetime_cpu_percent: f64,
    pub memory_percent: f64,
    pub whitelisted: bool,
    pub state: String,
}

impl From<&ProcessRecord> for ProcessData {
    fn from(record: &ProcessRecord) -> Self {
        ProcessData {
            pid: record.pid,
            name: record.name.clone(),
            cpu_percent: record.cpu_percent,
            lifetime_cpu_percent: record.lifetime_cpu_percent,
            memory_percent: record.memory_percent,
            whitelisted: record.whitelisted,
            state: record.alert.label().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub kind: String,
    pub pid: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
}

impl From<&MonitorEvent> for EventData {
    fn from(event: &MonitorEvent) -> Self {
        let kind = event.kind().to_string();
        match event {
            MonitorEvent::ProcessTerminated { pid, name } => EventData {
                kind,
                pid: *pid,
                name: name.clone(),
                cpu_percent: None,
                memory_percent: None,
            },
            MonitorEvent::ProcessCreated(r)
            | MonitorEvent::HighCpu(r)
            | MonitorEvent::HighMemory(r)
            | MonitorEvent::AlertCleared(r) => EventData {
                kind,
                pid: r.pid,
                name: r.name.clone(),
                cpu_percent: Some(r.cpu_percent),
                memory_percent: Some(r.memory_percent),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusData {
    pub monitored_count: usize,
    pub over_cpu: usize,
    pub over_memory: usize,
    pub alert_count: usize,
    pub running: bool,
    pub interval_seconds: u64,
}

impl From<MonitorStatistics> for StatusData {
    fn from(stats: MonitorStatistics) -> Self {
        StatusData {
            monitored_count: stats.total,
            over_cpu: stats.over_cpu,
            over_memory: stats.over_memory,
            alert_count: stats.active_alerts,
            running: stats.running,
            interval_seconds: stats.interval_seconds,
        }
    }
}
