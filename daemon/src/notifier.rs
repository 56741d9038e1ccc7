//! Forwards monitor events to connected IPC clients

use crate::events::{EventSink, MonitorEvent};
use crate::protocol::{EventData, Response};
use crate::registry::ProcessRecord;
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Serialises each event as a `Response::Event` line on a broadcast channel.
///
/// Sending never blocks, so it is safe on the monitor worker thread.
pub struct BroadcastSink {
    tx: broadcast::Sender<String>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }

    fn publish(&self, event: &MonitorEvent) {
        let response = Response::Event { data: EventData::from(event) };
        match serde_json::to_string(&response) {
            Ok(json) => {
                // No subscribers is not an error.
                if self.tx.send(json).is_err() {
                    debug!("No clients for {} event", event.kind());
                }
            }
            Err(e) => error!("Failed to encode {} event: {}", event.kind(), e),
        }
    }
}

impl EventSink for BroadcastSink {
    fn process_created(&self, record: &ProcessRecord) {
        self.publish(&MonitorEvent::ProcessCreated(record.clone()));
    }

    fn process_terminated(&self, pid: u32, name: &str) {
        self.publish(&MonitorEvent::ProcessTerminated { pid, name: name.to_string() });
    }

    fn high_cpu(&self, record: &ProcessRecord) {
        self.publish(&MonitorEvent::HighCpu(record.clone()));
    }

    fn high_memory(&self, record: &ProcessRecord) {
        self.publish(&MonitorEvent::HighMemory(record.clone()));
    }

    fn alert_cleared(&self, record: &ProcessRecord) {
        self.publish(&MonitorEvent::AlertCleared(record.clone()));
    }

    fn dispatch(&self, event: &MonitorEvent) {
        self.publish(event);
    }
}
