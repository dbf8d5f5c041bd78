//! usb-monitor daemon internals
//!
//! Wires the inventory engine to the outside world: TOML configuration, the
//! libusb hotplug event source and the Unix socket the report is served on.

pub mod config;
pub mod report_sink;
pub mod usb;

pub use config::MonitorConfig;
pub use report_sink::{ReportServer, query_report};
pub use usb::{EnumerationSource, UsbEventSource};
