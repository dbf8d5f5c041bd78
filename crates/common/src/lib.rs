//! Common utilities for usb-monitor
//!
//! This crate provides the pieces shared by the monitor daemon and its
//! tests: logging setup, error handling, and the async channel bridge to the
//! hotplug worker thread.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{
    BRIDGE_CAPACITY, WorkerBridge, WorkerCommand, WorkerEndpoint, WorkerEvent, WorkerStatus,
    create_worker_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
