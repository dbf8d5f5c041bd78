//! Inventory error types

use thiserror::Error;

/// Errors produced by the inventory engine
///
/// Only `InitializationFailed` and `InvalidConfig` are fatal. Everything
/// else is an expected, countable condition of the event path and is turned
/// into a [`crate::DispatchOutcome`] by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Device identity is not on the whitelist
    #[error("Device {vendor_id:04x}:{product_id:04x} rejected by admission filter")]
    AdmissionRejected { vendor_id: u16, product_id: u16 },

    /// Event payload did not carry a readable identity
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Store reached its configured capacity
    #[error("Inventory store full (capacity: {capacity})")]
    StoreFull { capacity: usize },

    /// Store write lock was held by another party
    #[error("Inventory store lock contended")]
    LockContended,

    /// Engine could not be brought up
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Invalid engine or filter configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Type alias for inventory results
pub type Result<T> = std::result::Result<T, InventoryError>;
