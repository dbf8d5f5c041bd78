//! USB subsystem
//!
//! Feeds the inventory from libusb. Hotplug callbacks run inside
//! `libusb_handle_events` and may not perform I/O, so they only queue a
//! [`HotplugNotice`]. A dedicated worker thread drains that queue, reads
//! string descriptors and dispatches into the inventory.

pub mod device;
pub mod source;
pub mod worker;

pub use device::{HotplugNotice, arrival_event, departure_event};
pub use source::{EnumerationSource, UsbEventSource, UsbRegistration};
pub use worker::{HotplugWorker, NOTICE_QUEUE_CAPACITY, spawn_hotplug_worker};
