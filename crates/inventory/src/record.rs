//! Device record types
//!
//! A record pairs the immutable identity of an observed device with the
//! mutable part of its connection lifecycle (connected flag and removal
//! time). Records are created by the dispatcher on an admitted connect and
//! only ever transition from connected to disconnected.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

/// Maximum length in bytes of the manufacturer, product and serial strings
pub const MAX_STRING_LEN: usize = 64;

/// Placeholder for string descriptors the device did not provide
pub const UNKNOWN_STRING: &str = "Unknown";

/// Inventory lookup key: the bus a device sits on and its address on it
///
/// `bus` is `None` when the event source could not tell which bus the
/// device belongs to; such keys are displayed as `unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub bus: Option<u8>,
    pub address: u8,
}

impl DeviceKey {
    pub fn new(bus: u8, address: u8) -> Self {
        Self {
            bus: Some(bus),
            address,
        }
    }

    /// Key for a device whose bus number is not known
    pub fn unknown_bus(address: u8) -> Self {
        Self { bus: None, address }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bus {
            Some(bus) => write!(f, "Bus {:03} Device {:03}", bus, self.address),
            None => write!(f, "Bus unknown Device {:03}", self.address),
        }
    }
}

/// Identity of an observed device
///
/// Equality and hashing only consider the [`DeviceKey`]: vendor and product
/// ids repeat across physically distinct devices and are carried for
/// admission and reporting only.
#[derive(Debug, Clone, Copy)]
pub struct DeviceIdentity {
    pub key: DeviceKey,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub fn new(bus: u8, address: u8, vendor_id: u16, product_id: u16) -> Self {
        Self {
            key: DeviceKey::new(bus, address),
            vendor_id,
            product_id,
        }
    }
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// String descriptors read from a device, already bounded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStrings {
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
}

impl DeviceStrings {
    /// Build bounded strings from optional descriptor values
    ///
    /// Missing or empty values become [`UNKNOWN_STRING`]; longer values are
    /// cut to [`MAX_STRING_LEN`] bytes.
    pub fn new(
        manufacturer: Option<&str>,
        product: Option<&str>,
        serial: Option<&str>,
    ) -> Self {
        Self {
            manufacturer: bounded_string(manufacturer),
            product: bounded_string(product),
            serial: bounded_string(serial),
        }
    }

    pub fn unknown() -> Self {
        Self::new(None, None, None)
    }
}

impl Default for DeviceStrings {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Truncate a descriptor string to [`MAX_STRING_LEN`] bytes
///
/// The cut falls on a UTF-8 character boundary so the result is always a
/// prefix of the input. Whitespace is kept as read; a value with nothing
/// but whitespace counts as missing.
pub fn bounded_string(value: Option<&str>) -> String {
    let value = match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => return UNKNOWN_STRING.to_string(),
    };

    if value.len() <= MAX_STRING_LEN {
        return value.to_string();
    }

    let mut end = MAX_STRING_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Stable handle of a record inside the store
///
/// Handles are assigned in insertion order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordHandle(pub u64);

/// One observed connection interval of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    identity: DeviceIdentity,
    strings: DeviceStrings,
    connected: bool,
    added_at: SystemTime,
    removed_at: Option<SystemTime>,
}

impl DeviceRecord {
    /// Create a connected record observed at `added_at`
    pub fn new(identity: DeviceIdentity, strings: DeviceStrings, added_at: SystemTime) -> Self {
        Self {
            identity,
            strings,
            connected: true,
            added_at,
            removed_at: None,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn key(&self) -> DeviceKey {
        self.identity.key
    }

    pub fn manufacturer(&self) -> &str {
        &self.strings.manufacturer
    }

    pub fn product(&self) -> &str {
        &self.strings.product
    }

    pub fn serial(&self) -> &str {
        &self.strings.serial
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn added_at(&self) -> SystemTime {
        self.added_at
    }

    pub fn removed_at(&self) -> Option<SystemTime> {
        self.removed_at
    }

    /// Transition to disconnected
    ///
    /// Returns `false` if the record was already disconnected. A removal time
    /// earlier than `added_at` is clamped so that `removed_at >= added_at`.
    pub(crate) fn mark_disconnected(&mut self, at: SystemTime) -> bool {
        if !self.connected {
            return false;
        }
        self.removed_at = Some(at.max(self.added_at));
        self.connected = false;
        true
    }
}
