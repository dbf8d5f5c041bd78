//! Event dispatcher
//!
//! Translates connect/disconnect notifications from an event source into
//! store mutations, following a per-key state machine:
//!
//! | state        | connect                       | disconnect            |
//! |--------------|-------------------------------|-----------------------|
//! | unknown      | new record (if admitted)      | no-op                 |
//! | connected    | no-op, counted as duplicate   | mark disconnected     |
//! | disconnected | new record, history kept      | no-op                 |
//!
//! The dispatcher is called from the event source's own context and must
//! return promptly. It never waits for the store lock: when the lock is
//! busy the event is parked in a bounded queue and replayed, in arrival
//! order, by the next dispatch or [`EventDispatcher::retry_deferred`] call
//! that gets the lock. When the queue is full the event is dropped and
//! counted. Nothing in here panics or returns an error to the source; every
//! condition ends up in [`DispatchOutcome`] and [`DispatchCounters`].

use crate::counters::{DispatchCounters, DispatchStats};
use crate::error::{InventoryError, Result};
use crate::filter::AdmissionFilter;
use crate::record::{DeviceIdentity, DeviceKey, DeviceRecord, DeviceStrings, RecordHandle};
use crate::store::{InventoryStore, InventoryWriter};
use async_channel::{Receiver, Sender};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Default number of events that can wait for a busy store lock
pub const DEFAULT_DEFERRED_QUEUE: usize = 64;

/// Kind of bus notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connect,
    Disconnect,
}

/// Notification payload as delivered by an event source
///
/// Every field may be missing; [`DeviceEvent::try_from`] decides whether
/// the payload carries enough to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: EventKind,
    pub bus: Option<u8>,
    pub address: Option<u8>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
}

impl RawEvent {
    fn empty(kind: EventKind) -> Self {
        Self {
            kind,
            bus: None,
            address: None,
            vendor_id: None,
            product_id: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// Connect notification for a fully known identity
    pub fn connect(identity: DeviceIdentity) -> Self {
        Self {
            bus: identity.key.bus,
            address: Some(identity.key.address),
            vendor_id: Some(identity.vendor_id),
            product_id: Some(identity.product_id),
            ..Self::empty(EventKind::Connect)
        }
    }

    /// Disconnect notification for a key
    pub fn disconnect(key: DeviceKey) -> Self {
        Self {
            bus: key.bus,
            address: Some(key.address),
            ..Self::empty(EventKind::Disconnect)
        }
    }

    /// Notification with nothing but its kind
    pub fn unidentified(kind: EventKind) -> Self {
        Self::empty(kind)
    }

    /// Key the notification refers to, if it names an address
    pub fn key(&self) -> Option<DeviceKey> {
        self.address.map(|address| DeviceKey {
            bus: self.bus,
            address,
        })
    }

    /// Attach string descriptors to a connect notification
    pub fn with_strings(
        mut self,
        manufacturer: Option<String>,
        product: Option<String>,
        serial: Option<String>,
    ) -> Self {
        self.manufacturer = manufacturer;
        self.product = product;
        self.serial = serial;
        self
    }
}

/// Validated notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connect {
        identity: DeviceIdentity,
        strings: DeviceStrings,
    },
    Disconnect {
        key: DeviceKey,
    },
}

impl DeviceEvent {
    pub fn key(&self) -> DeviceKey {
        match self {
            Self::Connect { identity, .. } => identity.key,
            Self::Disconnect { key } => *key,
        }
    }
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { identity, .. } => write!(
                f,
                "connect {} ID {:04x}:{:04x}",
                identity.key, identity.vendor_id, identity.product_id
            ),
            Self::Disconnect { key } => write!(f, "disconnect {}", key),
        }
    }
}

impl TryFrom<RawEvent> for DeviceEvent {
    type Error = InventoryError;

    fn try_from(raw: RawEvent) -> Result<Self> {
        let address = match raw.address {
            Some(0) => {
                return Err(InventoryError::MalformedEvent(
                    "device address 0 is not a valid address".to_string(),
                ));
            }
            Some(address) => address,
            None => {
                return Err(InventoryError::MalformedEvent(
                    "missing device address".to_string(),
                ));
            }
        };
        let key = DeviceKey {
            bus: raw.bus,
            address,
        };

        match raw.kind {
            EventKind::Disconnect => Ok(Self::Disconnect { key }),
            EventKind::Connect => {
                let (vendor_id, product_id) = raw
                    .vendor_id
                    .zip(raw.product_id)
                    .ok_or_else(|| {
                        InventoryError::MalformedEvent(format!(
                            "missing vendor/product id for {}",
                            key
                        ))
                    })?;

                Ok(Self::Connect {
                    identity: DeviceIdentity {
                        key,
                        vendor_id,
                        product_id,
                    },
                    strings: DeviceStrings::new(
                        raw.manufacturer.as_deref(),
                        raw.product.as_deref(),
                        raw.serial.as_deref(),
                    ),
                })
            }
        }
    }
}

/// What the dispatcher did with one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A new record was created
    Inserted(RecordHandle),
    /// An existing record was marked disconnected
    Disconnected(RecordHandle),
    /// Connect for a key that is already connected; nothing changed
    Duplicate(RecordHandle),
    /// Disconnect for an unknown or already disconnected key
    Ignored,
    /// Store lock was busy; the event is queued for replay
    Deferred,
    /// Admission filter refused the device
    Rejected(InventoryError),
    /// Event was dropped (malformed, store full, or lock busy with a full
    /// queue)
    Dropped(InventoryError),
}

impl DispatchOutcome {
    pub fn error(&self) -> Option<&InventoryError> {
        match self {
            Self::Rejected(e) | Self::Dropped(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the store changed as a direct result of this event
    pub fn changed_store(&self) -> bool {
        matches!(self, Self::Inserted(_) | Self::Disconnected(_))
    }
}

#[derive(Debug)]
struct PendingEvent {
    event: DeviceEvent,
    observed_at: SystemTime,
}

/// Applies bus notifications to an [`InventoryStore`]
pub struct EventDispatcher {
    store: Arc<InventoryStore>,
    filter: AdmissionFilter,
    counters: Arc<DispatchCounters>,
    deferred_tx: Sender<PendingEvent>,
    deferred_rx: Receiver<PendingEvent>,
    deferred_capacity: usize,
}

impl EventDispatcher {
    /// Create a dispatcher with the default deferred queue size
    pub fn new(store: Arc<InventoryStore>, filter: AdmissionFilter) -> Self {
        let (deferred_tx, deferred_rx) = async_channel::bounded(DEFAULT_DEFERRED_QUEUE);
        Self {
            store,
            filter,
            counters: Arc::new(DispatchCounters::new()),
            deferred_tx,
            deferred_rx,
            deferred_capacity: DEFAULT_DEFERRED_QUEUE,
        }
    }

    /// Create a dispatcher whose deferred queue holds `capacity` events
    pub fn with_deferred_capacity(
        store: Arc<InventoryStore>,
        filter: AdmissionFilter,
        capacity: usize,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(InventoryError::InvalidConfig(
                "Deferred queue size must be greater than 0".to_string(),
            ));
        }

        let (deferred_tx, deferred_rx) = async_channel::bounded(capacity);
        Ok(Self {
            store,
            filter,
            counters: Arc::new(DispatchCounters::new()),
            deferred_tx,
            deferred_rx,
            deferred_capacity: capacity,
        })
    }

    pub fn store(&self) -> &Arc<InventoryStore> {
        &self.store
    }

    pub fn filter(&self) -> &AdmissionFilter {
        &self.filter
    }

    pub fn counters(&self) -> &Arc<DispatchCounters> {
        &self.counters
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.stats()
    }

    /// Number of events waiting for the store lock
    pub fn pending_deferred(&self) -> usize {
        self.deferred_rx.len()
    }

    /// Handle a notification observed now
    pub fn dispatch(&self, raw: RawEvent) -> DispatchOutcome {
        self.dispatch_at(raw, SystemTime::now())
    }

    /// Handle a notification observed at `observed_at`
    pub fn dispatch_at(&self, raw: RawEvent, observed_at: SystemTime) -> DispatchOutcome {
        let event = match DeviceEvent::try_from(raw) {
            Ok(event) => event,
            Err(e) => {
                self.counters.record_malformed();
                warn!("Dropping event: {}", e);
                return DispatchOutcome::Dropped(e);
            }
        };

        if let DeviceEvent::Connect { identity, .. } = &event
            && !self.filter.admit(identity.vendor_id, identity.product_id)
        {
            self.counters.record_rejected();
            debug!("Not admitted: {}", event);
            return DispatchOutcome::Rejected(InventoryError::AdmissionRejected {
                vendor_id: identity.vendor_id,
                product_id: identity.product_id,
            });
        }

        self.submit(PendingEvent { event, observed_at })
    }

    /// Connect notification with a known identity
    pub fn on_connect(&self, identity: DeviceIdentity, strings: DeviceStrings) -> DispatchOutcome {
        let raw = RawEvent::connect(identity).with_strings(
            Some(strings.manufacturer),
            Some(strings.product),
            Some(strings.serial),
        );
        self.dispatch(raw)
    }

    /// Disconnect notification for a key
    pub fn on_disconnect(&self, key: DeviceKey) -> DispatchOutcome {
        self.dispatch(RawEvent::disconnect(key))
    }

    /// Replay queued events if the store lock is free
    ///
    /// Returns the number of events applied. Never waits for the lock.
    pub fn retry_deferred(&self) -> usize {
        if self.deferred_rx.is_empty() {
            return 0;
        }

        match self.store.try_write() {
            Ok(mut writer) => self.replay(&mut writer).0,
            Err(_) => 0,
        }
    }

    fn submit(&self, pending: PendingEvent) -> DispatchOutcome {
        let mut writer = match self.store.try_write() {
            Ok(writer) => writer,
            Err(_) => return self.defer(pending),
        };

        // Older queued events go first; if they could not all be replayed
        // this event has to queue behind them
        let (_, drained) = self.replay(&mut writer);
        if !drained {
            drop(writer);
            return self.defer(pending);
        }

        self.apply(&mut writer, pending)
    }

    fn defer(&self, pending: PendingEvent) -> DispatchOutcome {
        match self.deferred_tx.try_send(pending) {
            Ok(()) => {
                self.counters.record_deferred();
                DispatchOutcome::Deferred
            }
            Err(e) => {
                self.counters.record_dropped_contended();
                warn!(
                    "Dropping {}: store lock busy and deferred queue full",
                    e.into_inner().event
                );
                DispatchOutcome::Dropped(InventoryError::LockContended)
            }
        }
    }

    /// Apply up to one queue's worth of deferred events
    ///
    /// Returns how many were applied and whether the queue is now empty.
    fn replay(&self, writer: &mut InventoryWriter<'_>) -> (usize, bool) {
        let mut applied = 0;

        for _ in 0..self.deferred_capacity {
            match self.deferred_rx.try_recv() {
                Ok(pending) => {
                    let outcome = self.apply(writer, pending);
                    debug!("Replayed deferred event: {:?}", outcome);
                    applied += 1;
                }
                Err(_) => return (applied, true),
            }
        }

        (applied, self.deferred_rx.is_empty())
    }

    fn apply(&self, writer: &mut InventoryWriter<'_>, pending: PendingEvent) -> DispatchOutcome {
        let PendingEvent { event, observed_at } = pending;

        match event {
            DeviceEvent::Connect { identity, strings } => {
                let key = identity.key;

                if writer.is_connected(key) {
                    self.counters.record_duplicate();
                    debug!("Duplicate connect for {}, already tracked", key);
                    return match writer.find(key) {
                        Some(handle) => DispatchOutcome::Duplicate(handle),
                        None => DispatchOutcome::Ignored,
                    };
                }

                match writer.insert(DeviceRecord::new(identity, strings, observed_at)) {
                    Ok(inserted) => {
                        if inserted.evicted.is_some() {
                            self.counters.record_evicted();
                        }
                        self.counters.record_admitted();
                        DispatchOutcome::Inserted(inserted.handle)
                    }
                    Err(e) => {
                        self.counters.record_store_full();
                        warn!("Dropping connect for {}: {}", key, e);
                        DispatchOutcome::Dropped(e)
                    }
                }
            }
            DeviceEvent::Disconnect { key } => match writer.mark_disconnected(key, observed_at) {
                Some(handle) => {
                    self.counters.record_disconnect();
                    DispatchOutcome::Disconnected(handle)
                }
                None => {
                    self.counters.record_ignored();
                    debug!("Disconnect for {} ignored, no connected record", key);
                    DispatchOutcome::Ignored
                }
            },
        }
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("filter", &self.filter)
            .field("records", &self.store.len())
            .field("pending_deferred", &self.pending_deferred())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OverflowPolicy;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn dispatcher(filter: AdmissionFilter) -> EventDispatcher {
        let store = Arc::new(InventoryStore::new(16, OverflowPolicy::RejectNewest).unwrap());
        EventDispatcher::new(store, filter)
    }

    fn connect(bus: u8, address: u8, vid: u16, pid: u16) -> RawEvent {
        RawEvent::connect(DeviceIdentity::new(bus, address, vid, pid))
    }

    #[test]
    fn test_raw_event_validation() {
        let missing_address = RawEvent::unidentified(EventKind::Connect);
        assert!(matches!(
            DeviceEvent::try_from(missing_address),
            Err(InventoryError::MalformedEvent(_))
        ));

        let mut zero_address = connect(1, 2, 0x1234, 0x5678);
        zero_address.address = Some(0);
        assert!(DeviceEvent::try_from(zero_address).is_err());

        let mut no_ids = connect(1, 2, 0x1234, 0x5678);
        no_ids.product_id = None;
        assert!(DeviceEvent::try_from(no_ids).is_err());

        // Disconnects only need the key
        let mut unknown_bus = RawEvent::disconnect(DeviceKey::new(1, 2));
        unknown_bus.bus = None;
        assert_eq!(
            DeviceEvent::try_from(unknown_bus).unwrap(),
            DeviceEvent::Disconnect {
                key: DeviceKey::unknown_bus(2)
            }
        );
    }

    #[test]
    fn test_connect_creates_record() {
        let dispatcher = dispatcher(AdmissionFilter::AllowAll);
        let raw = connect(1, 2, 0x1234, 0x5678).with_strings(
            Some("Acme".to_string()),
            None,
            Some("SN1".to_string()),
        );

        let outcome = dispatcher.dispatch_at(raw, at(10));
        let DispatchOutcome::Inserted(handle) = outcome else {
            panic!("expected insert, got {:?}", outcome);
        };

        let record = dispatcher.store().get(handle).unwrap();
        assert_eq!(record.manufacturer(), "Acme");
        assert_eq!(record.product(), "Unknown");
        assert_eq!(record.serial(), "SN1");
        assert_eq!(record.added_at(), at(10));
        assert!(record.is_connected());
        assert_eq!(dispatcher.stats().admitted, 1);
    }

    #[test]
    fn test_on_connect_with_unknown_strings() {
        let dispatcher = dispatcher(AdmissionFilter::AllowAll);
        let identity = DeviceIdentity::new(3, 7, 0x046d, 0xc52b);

        let outcome = dispatcher.on_connect(identity, DeviceStrings::unknown());
        assert!(matches!(outcome, DispatchOutcome::Inserted(_)));

        let report = crate::report::render(&dispatcher.store().snapshot(), None);
        assert!(report.contains("    Manufacturer: Unknown\n"));
        assert!(report.contains("    Product:      Unknown\n"));
        assert!(report.contains("    Serial:       Unknown\n"));
    }

    #[test]
    fn test_on_connect_keeps_strings_and_on_disconnect_closes() {
        let dispatcher = dispatcher(AdmissionFilter::AllowAll);
        let identity = DeviceIdentity::new(1, 9, 0x1234, 0x5678);
        let strings = DeviceStrings::new(Some("Acme"), Some("Widget"), None);

        let DispatchOutcome::Inserted(handle) = dispatcher.on_connect(identity, strings) else {
            panic!("expected insert");
        };
        let record = dispatcher.store().get(handle).unwrap();
        assert_eq!(record.manufacturer(), "Acme");
        assert_eq!(record.product(), "Widget");
        assert_eq!(record.serial(), "Unknown");

        let key = DeviceKey::new(1, 9);
        assert_eq!(dispatcher.on_disconnect(key), DispatchOutcome::Disconnected(handle));
        assert_eq!(dispatcher.on_disconnect(key), DispatchOutcome::Ignored);
        assert!(!dispatcher.store().get(handle).unwrap().is_connected());
    }

    #[test]
    fn test_changed_store_matches_store_mutations() {
        let dispatcher = dispatcher(AdmissionFilter::whitelist([(0x1234, 0x5678)]));
        let key = DeviceKey::new(1, 2);

        let inserted = dispatcher.dispatch_at(connect(1, 2, 0x1234, 0x5678), at(10));
        let duplicate = dispatcher.dispatch_at(connect(1, 2, 0x1234, 0x5678), at(11));
        let rejected = dispatcher.dispatch_at(connect(1, 3, 0x0001, 0x0002), at(12));
        let disconnected = dispatcher.dispatch_at(RawEvent::disconnect(key), at(13));
        let ignored = dispatcher.dispatch_at(RawEvent::disconnect(key), at(14));
        let dropped = dispatcher.dispatch_at(RawEvent::unidentified(EventKind::Connect), at(15));

        assert!(inserted.changed_store());
        assert!(disconnected.changed_store());
        for outcome in [&duplicate, &rejected, &ignored, &dropped] {
            assert!(!outcome.changed_store(), "{:?}", outcome);
        }
        assert!(!DispatchOutcome::Deferred.changed_store());
        assert_eq!(dispatcher.store().len(), 1);
    }

    #[test]
    fn test_duplicate_connect_is_noop() {
        let dispatcher = dispatcher(AdmissionFilter::AllowAll);
        let first = dispatcher.dispatch_at(connect(1, 2, 0x1234, 0x5678), at(10));
        let second = dispatcher.dispatch_at(connect(1, 2, 0x1234, 0x5678), at(11));

        let DispatchOutcome::Inserted(handle) = first else {
            panic!("expected insert");
        };
        assert_eq!(second, DispatchOutcome::Duplicate(handle));
        assert_eq!(dispatcher.store().len(), 1);
        assert_eq!(dispatcher.stats().duplicates, 1);
    }

    #[test]
    fn test_reconnect_after_disconnect_keeps_history() {
        let dispatcher = dispatcher(AdmissionFilter::AllowAll);
        let key = DeviceKey::new(1, 2);

        dispatcher.dispatch_at(connect(1, 2, 0x1234, 0x5678), at(10));
        assert!(matches!(
            dispatcher.dispatch_at(RawEvent::disconnect(key), at(20)),
            DispatchOutcome::Disconnected(_)
        ));
        assert!(matches!(
            dispatcher.dispatch_at(connect(1, 2, 0x1234, 0x5678), at(30)),
            DispatchOutcome::Inserted(_)
        ));

        let snapshot = dispatcher.store().snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.records()[0].record.is_connected());
        assert!(snapshot.records()[1].record.is_connected());
    }

    #[test]
    fn test_disconnect_unknown_and_repeated() {
        let dispatcher = dispatcher(AdmissionFilter::AllowAll);
        let key = DeviceKey::new(4, 4);

        assert_eq!(
            dispatcher.dispatch_at(RawEvent::disconnect(key), at(5)),
            DispatchOutcome::Ignored
        );
        assert!(dispatcher.store().is_empty());

        dispatcher.dispatch_at(connect(4, 4, 0x1, 0x2), at(10));
        dispatcher.dispatch_at(RawEvent::disconnect(key), at(20));
        assert_eq!(
            dispatcher.dispatch_at(RawEvent::disconnect(key), at(30)),
            DispatchOutcome::Ignored
        );
        assert_eq!(dispatcher.stats().ignored, 2);
    }

    #[test]
    fn test_whitelist_rejection_is_reported() {
        let dispatcher = dispatcher(AdmissionFilter::whitelist([(0xffff, 0x5678)]));

        let outcome = dispatcher.dispatch_at(connect(1, 2, 0x0001, 0x0002), at(10));
        assert_eq!(
            outcome,
            DispatchOutcome::Rejected(InventoryError::AdmissionRejected {
                vendor_id: 0x0001,
                product_id: 0x0002,
            })
        );
        assert!(dispatcher.store().is_empty());
        assert_eq!(dispatcher.stats().rejected, 1);
    }

    #[test]
    fn test_malformed_event_counted() {
        let dispatcher = dispatcher(AdmissionFilter::AllowAll);
        let outcome = dispatcher.dispatch(RawEvent::unidentified(EventKind::Disconnect));

        assert!(matches!(
            outcome,
            DispatchOutcome::Dropped(InventoryError::MalformedEvent(_))
        ));
        assert_eq!(dispatcher.stats().malformed, 1);
    }

    #[test]
    fn test_store_full_counted() {
        let store = Arc::new(InventoryStore::new(1, OverflowPolicy::RejectNewest).unwrap());
        let dispatcher = EventDispatcher::new(store, AdmissionFilter::AllowAll);

        dispatcher.dispatch_at(connect(1, 1, 0x1, 0x1), at(10));
        let outcome = dispatcher.dispatch_at(connect(1, 2, 0x1, 0x1), at(11));

        assert_eq!(
            outcome,
            DispatchOutcome::Dropped(InventoryError::StoreFull { capacity: 1 })
        );
        assert_eq!(dispatcher.stats().store_full, 1);
    }

    #[test]
    fn test_contended_events_are_deferred_and_replayed_in_order() {
        let dispatcher = dispatcher(AdmissionFilter::AllowAll);
        let key = DeviceKey::new(1, 2);

        {
            let _reader = dispatcher.store().view();
            assert_eq!(
                dispatcher.dispatch_at(connect(1, 2, 0x1, 0x1), at(10)),
                DispatchOutcome::Deferred
            );
            assert_eq!(
                dispatcher.dispatch_at(RawEvent::disconnect(key), at(20)),
                DispatchOutcome::Deferred
            );
            assert_eq!(dispatcher.retry_deferred(), 0);
        }

        assert_eq!(dispatcher.pending_deferred(), 2);
        assert_eq!(dispatcher.retry_deferred(), 2);
        assert_eq!(dispatcher.pending_deferred(), 0);

        let record = dispatcher.store().snapshot().records()[0].record.clone();
        assert_eq!(record.added_at(), at(10));
        assert_eq!(record.removed_at(), Some(at(20)));
        assert_eq!(dispatcher.stats().deferred, 2);
    }

    #[test]
    fn test_next_dispatch_replays_before_applying() {
        let dispatcher = dispatcher(AdmissionFilter::AllowAll);

        {
            let _reader = dispatcher.store().view();
            dispatcher.dispatch_at(connect(1, 1, 0x1, 0x1), at(10));
        }

        let outcome = dispatcher.dispatch_at(connect(1, 2, 0x1, 0x1), at(11));
        assert!(matches!(outcome, DispatchOutcome::Inserted(_)));

        let addresses: Vec<u8> = dispatcher
            .store()
            .snapshot()
            .iter()
            .map(|s| s.record.key().address)
            .collect();
        assert_eq!(addresses, vec![1, 2]);
    }

    #[test]
    fn test_full_deferred_queue_drops() {
        let store = Arc::new(InventoryStore::new(16, OverflowPolicy::RejectNewest).unwrap());
        let dispatcher =
            EventDispatcher::with_deferred_capacity(store, AdmissionFilter::AllowAll, 1).unwrap();

        let _reader = dispatcher.store().view();
        assert_eq!(
            dispatcher.dispatch_at(connect(1, 1, 0x1, 0x1), at(10)),
            DispatchOutcome::Deferred
        );
        assert_eq!(
            dispatcher.dispatch_at(connect(1, 2, 0x1, 0x1), at(11)),
            DispatchOutcome::Dropped(InventoryError::LockContended)
        );
        assert_eq!(dispatcher.stats().dropped_contended, 1);
    }

    #[test]
    fn test_zero_deferred_capacity_rejected() {
        let store = Arc::new(InventoryStore::with_default_capacity().unwrap());
        assert!(
            EventDispatcher::with_deferred_capacity(store, AdmissionFilter::AllowAll, 0).is_err()
        );
    }
}
