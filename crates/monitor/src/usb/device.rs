//! Translation from libusb devices to inventory events

use inventory::{DeviceKey, EventKind, RawEvent};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle};
use tracing::debug;

/// What a hotplug callback queues for the worker thread
#[derive(Debug)]
pub enum HotplugNotice {
    /// Device attached; the descriptor is `None` when libusb had none cached
    Arrived {
        device: Device<Context>,
        descriptor: Option<DeviceDescriptor>,
    },
    /// Device detached
    Left { bus: u8, address: u8 },
}

impl HotplugNotice {
    /// Build the notice for a newly attached device
    ///
    /// Only reads the cached device descriptor, which is safe inside a
    /// hotplug callback.
    pub fn arrived(device: Device<Context>) -> Self {
        let descriptor = device.device_descriptor().ok();
        Self::Arrived { device, descriptor }
    }

    pub fn left(device: &Device<Context>) -> Self {
        Self::Left {
            bus: device.bus_number(),
            address: device.address(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Arrived { .. } => EventKind::Connect,
            Self::Left { .. } => EventKind::Disconnect,
        }
    }
}

/// Connect event for an attached device
///
/// String descriptors are read best-effort: a device that cannot be opened
/// (usually a permissions issue) is still reported, with unknown strings.
pub fn arrival_event(device: &Device<Context>, descriptor: Option<&DeviceDescriptor>) -> RawEvent {
    let (manufacturer, product, serial) = descriptor
        .and_then(|desc| match device.open() {
            Ok(handle) => Some(read_string_descriptors(&handle, desc)),
            Err(e) => {
                debug!(
                    "Cannot open device bus={} addr={} for strings: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                None
            }
        })
        .unwrap_or((None, None, None));

    RawEvent {
        kind: EventKind::Connect,
        bus: Some(device.bus_number()),
        address: Some(device.address()),
        vendor_id: descriptor.map(|d| d.vendor_id()),
        product_id: descriptor.map(|d| d.product_id()),
        manufacturer,
        product,
        serial,
    }
}

/// Disconnect event for a detached device
pub fn departure_event(bus: u8, address: u8) -> RawEvent {
    RawEvent::disconnect(DeviceKey::new(bus, address))
}

fn read_string_descriptors(
    handle: &DeviceHandle<Context>,
    descriptor: &DeviceDescriptor,
) -> (Option<String>, Option<String>, Option<String>) {
    let manufacturer = descriptor
        .manufacturer_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let product = descriptor
        .product_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let serial = descriptor
        .serial_number_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    (manufacturer, product, serial)
}
