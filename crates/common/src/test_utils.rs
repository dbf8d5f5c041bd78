//! Test utilities for usb-monitor
//!
//! Provides event builders and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::mock_connect;
//! use inventory::EventKind;
//!
//! let event = mock_connect(1, 0x1234, 0x5678);
//! assert_eq!(event.kind, EventKind::Connect);
//! assert_eq!(event.vendor_id, Some(0x1234));
//! ```

use inventory::{DeviceIdentity, DeviceKey, RawEvent};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bus number used by the mock builders
pub const MOCK_BUS: u8 = 1;

/// Identity of a mock device on [`MOCK_BUS`]
pub fn mock_identity(address: u8, vendor_id: u16, product_id: u16) -> DeviceIdentity {
    DeviceIdentity::new(MOCK_BUS, address, vendor_id, product_id)
}

/// Connect notification with all string descriptors filled in
///
/// # Arguments
/// * `address` - Device address on [`MOCK_BUS`]
/// * `vendor_id` - USB Vendor ID
/// * `product_id` - USB Product ID
pub fn mock_connect(address: u8, vendor_id: u16, product_id: u16) -> RawEvent {
    RawEvent::connect(mock_identity(address, vendor_id, product_id)).with_strings(
        Some(format!("Test Manufacturer {}", address)),
        Some(format!("Test Product {}", address)),
        Some(format!("SN{:06}", address)),
    )
}

/// Connect notification for a device that exposes no string descriptors
pub fn mock_connect_bare(address: u8, vendor_id: u16, product_id: u16) -> RawEvent {
    RawEvent::connect(mock_identity(address, vendor_id, product_id))
}

/// Disconnect notification for a device on [`MOCK_BUS`]
pub fn mock_disconnect(address: u8) -> RawEvent {
    RawEvent::disconnect(DeviceKey::new(MOCK_BUS, address))
}

/// Connect notifications for `count` distinct devices, addresses from 1
pub fn mock_connect_sequence(count: u8) -> Vec<RawEvent> {
    (1..=count)
        .map(|address| mock_connect(address, 0x1000 + address as u16, 0x2000 + address as u16))
        .collect()
}

/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Arguments
/// * `duration` - Maximum time to wait
/// * `future` - The async operation to run
///
/// # Returns
/// Result containing the operation result or a timeout error
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
