//! Process resource monitor with debounced CPU and memory alerts.
//!
//! [`monitor::Monitor`] polls the kernel process table on a background
//! thread, keeps a registry of live processes and reports lifecycle and
//! alert transitions through an [`events::EventSink`].

pub mod alert;
pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod monitor;
pub mod notifier;
pub mod protocol;
pub mod registry;
pub mod socket;
pub mod usage;
