//! Device inventory engine for usb-monitor
//!
//! This crate keeps a running, insertion-ordered inventory of devices seen
//! on a bus. Connect and disconnect notifications from an event source go
//! through an [`EventDispatcher`], which applies the [`AdmissionFilter`] and
//! mutates the shared [`InventoryStore`] without ever blocking the source.
//! Readers take snapshots of the store and render them with [`render`].
//!
//! # Example
//!
//! ```
//! use inventory::{
//!     AdmissionFilter, DeviceIdentity, EventDispatcher, InventoryStore, OverflowPolicy,
//!     RawEvent, render,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(InventoryStore::new(16, OverflowPolicy::RejectNewest).unwrap());
//! let dispatcher = EventDispatcher::new(Arc::clone(&store), AdmissionFilter::AllowAll);
//!
//! let identity = DeviceIdentity::new(1, 2, 0x1234, 0x5678);
//! dispatcher.dispatch(RawEvent::connect(identity).with_strings(
//!     Some("Acme".to_string()),
//!     Some("Widget".to_string()),
//!     Some("SN1".to_string()),
//! ));
//!
//! let report = render(&store.snapshot(), None);
//! assert!(report.contains("Devices: 1"));
//! assert!(report.contains("Status:       Connected"));
//! ```

pub mod counters;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod record;
pub mod report;
pub mod store;

pub use counters::{DispatchCounters, DispatchStats};
pub use dispatcher::{
    DEFAULT_DEFERRED_QUEUE, DeviceEvent, DispatchOutcome, EventDispatcher, EventKind, RawEvent,
};
pub use error::{InventoryError, Result};
pub use filter::{AdmissionFilter, parse_vid_pid};
pub use lifecycle::{EngineConfig, EventSource, InventoryEngine};
pub use record::{
    DeviceIdentity, DeviceKey, DeviceRecord, DeviceStrings, MAX_STRING_LEN, RecordHandle,
    UNKNOWN_STRING,
};
pub use report::{ReportRenderer, format_timestamp, render};
pub use store::{
    DEFAULT_CAPACITY, Inserted, InventorySnapshot, InventoryStore, InventoryView, InventoryWriter,
    OverflowPolicy, StoredRecord,
};
