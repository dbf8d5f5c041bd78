//! Inventory store
//!
//! Insertion-ordered collection of [`DeviceRecord`]s shared between the
//! event path and the report path.
//!
//! Writers never wait for the lock: [`InventoryStore::try_write`] either
//! hands out an [`InventoryWriter`] immediately or fails with
//! [`InventoryError::LockContended`]. Readers take a blocking read lock for
//! the duration of a lookup or a snapshot copy. Storage is reserved up front
//! for the configured capacity, so an insert under the write lock never
//! allocates.

use crate::error::{InventoryError, Result};
use crate::record::{DeviceKey, DeviceRecord, RecordHandle};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::SystemTime;
use tracing::debug;

/// Default maximum number of records
pub const DEFAULT_CAPACITY: usize = 1024;

/// What `insert` does once the store holds `capacity` records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Refuse the new record with `StoreFull`
    #[default]
    RejectNewest,
    /// Drop the oldest disconnected record to make room; `StoreFull` if
    /// every record is still connected
    EvictOldestDisconnected,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RejectNewest => "reject-newest",
            Self::EvictOldestDisconnected => "evict-oldest-disconnected",
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reject-newest" => Ok(Self::RejectNewest),
            "evict-oldest-disconnected" => Ok(Self::EvictOldestDisconnected),
            other => Err(InventoryError::InvalidConfig(format!(
                "Invalid overflow policy '{}', must be one of: reject-newest, evict-oldest-disconnected",
                other
            ))),
        }
    }
}

/// A record together with its store handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub handle: RecordHandle,
    pub record: DeviceRecord,
}

/// Result of a successful insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    /// Handle of the new record
    pub handle: RecordHandle,
    /// Record dropped to make room, if the overflow policy evicted one
    pub evicted: Option<RecordHandle>,
}

#[derive(Debug)]
struct StoreInner {
    /// Records in insertion order; handles are strictly increasing
    records: Vec<StoredRecord>,
    /// Most recently inserted record per key
    latest: HashMap<DeviceKey, RecordHandle>,
    next_handle: u64,
}

impl StoreInner {
    fn position(&self, handle: RecordHandle) -> Option<usize> {
        self.records
            .binary_search_by_key(&handle, |stored| stored.handle)
            .ok()
    }
}

/// Concurrency-safe device inventory
#[derive(Debug)]
pub struct InventoryStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl InventoryStore {
    /// Create a store holding at most `capacity` records
    ///
    /// All storage is reserved here; failing to reserve it is an
    /// initialization failure rather than a later out-of-memory abort.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(InventoryError::InvalidConfig(
                "Inventory capacity must be greater than 0".to_string(),
            ));
        }

        let mut records = Vec::new();
        records.try_reserve_exact(capacity).map_err(|e| {
            InventoryError::InitializationFailed(format!(
                "Failed to reserve storage for {} records: {}",
                capacity, e
            ))
        })?;

        let mut latest = HashMap::new();
        latest.try_reserve(capacity).map_err(|e| {
            InventoryError::InitializationFailed(format!(
                "Failed to reserve index for {} records: {}",
                capacity, e
            ))
        })?;

        debug!(
            "Inventory store allocated: capacity={}, policy={}",
            capacity,
            policy.as_str()
        );

        Ok(Self {
            inner: RwLock::new(StoreInner {
                records,
                latest,
                next_handle: 1,
            }),
            capacity,
            policy,
        })
    }

    /// Create a store with [`DEFAULT_CAPACITY`] and the default policy
    pub fn with_default_capacity() -> Result<Self> {
        Self::new(DEFAULT_CAPACITY, OverflowPolicy::default())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Take the write lock without waiting
    pub fn try_write(&self) -> Result<InventoryWriter<'_>> {
        let guard = match self.inner.try_write() {
            Ok(guard) => guard,
            // Every mutation leaves the inner state consistent, so a panic
            // elsewhere while holding the lock does not invalidate it
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(InventoryError::LockContended),
        };

        Ok(InventoryWriter {
            inner: guard,
            capacity: self.capacity,
            policy: self.policy,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record at the tail
    pub fn insert(&self, record: DeviceRecord) -> Result<RecordHandle> {
        self.try_write()?.insert(record).map(|inserted| inserted.handle)
    }

    /// Mark the latest record for `key` disconnected
    ///
    /// Returns the handle of the record that changed state, or `None` if
    /// there was nothing to change.
    pub fn mark_disconnected(&self, key: DeviceKey, at: SystemTime) -> Result<Option<RecordHandle>> {
        Ok(self.try_write()?.mark_disconnected(key, at))
    }

    /// Most recently inserted record for `key`, live or historical
    pub fn find(&self, key: DeviceKey) -> Option<RecordHandle> {
        self.read().latest.get(&key).copied()
    }

    /// Copy of a single record
    pub fn get(&self, handle: RecordHandle) -> Option<DeviceRecord> {
        let inner = self.read();
        inner
            .position(handle)
            .map(|pos| inner.records[pos].record.clone())
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connected_count(&self) -> usize {
        self.read()
            .records
            .iter()
            .filter(|stored| stored.record.is_connected())
            .count()
    }

    /// Read-locked view of the records
    ///
    /// Writers cannot take the lock while the view is alive, so they defer
    /// their events; keep views short-lived and prefer [`Self::snapshot`].
    pub fn view(&self) -> InventoryView<'_> {
        InventoryView {
            inner: self.read(),
            capacity: self.capacity,
        }
    }

    /// Point-in-time copy of every record in insertion order
    pub fn snapshot(&self) -> InventorySnapshot {
        self.view().to_snapshot()
    }
}

/// Shared access to the store for one read section
pub struct InventoryView<'a> {
    inner: RwLockReadGuard<'a, StoreInner>,
    capacity: usize,
}

impl InventoryView<'_> {
    pub fn records(&self) -> &[StoredRecord] {
        &self.inner.records
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    /// Copy the viewed records out so the lock can be released
    pub fn to_snapshot(&self) -> InventorySnapshot {
        InventorySnapshot {
            records: self.inner.records.clone(),
            capacity: self.capacity,
        }
    }
}

/// Exclusive access to the store for one critical section
///
/// Obtained through [`InventoryStore::try_write`]; the lock is released
/// when the writer is dropped.
pub struct InventoryWriter<'a> {
    inner: RwLockWriteGuard<'a, StoreInner>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl InventoryWriter<'_> {
    /// Most recently inserted record for `key`
    pub fn find(&self, key: DeviceKey) -> Option<RecordHandle> {
        self.inner.latest.get(&key).copied()
    }

    /// Whether the latest record for `key` is still connected
    pub fn is_connected(&self, key: DeviceKey) -> bool {
        self.find(key)
            .and_then(|handle| self.inner.position(handle))
            .is_some_and(|pos| self.inner.records[pos].record.is_connected())
    }

    /// Append a record, applying the overflow policy when full
    pub fn insert(&mut self, record: DeviceRecord) -> Result<Inserted> {
        let mut evicted = None;

        if self.inner.records.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::RejectNewest => {
                    return Err(InventoryError::StoreFull {
                        capacity: self.capacity,
                    });
                }
                OverflowPolicy::EvictOldestDisconnected => {
                    evicted = Some(self.evict_oldest_disconnected().ok_or(
                        InventoryError::StoreFull {
                            capacity: self.capacity,
                        },
                    )?);
                }
            }
        }

        let handle = RecordHandle(self.inner.next_handle);
        self.inner.next_handle += 1;

        let key = record.key();
        self.inner.records.push(StoredRecord { handle, record });
        self.inner.latest.insert(key, handle);

        Ok(Inserted { handle, evicted })
    }

    /// Mark the latest record for `key` disconnected at `at`
    ///
    /// No-op if the key is unknown or its latest record is already
    /// disconnected. Only the latest record of a key can be connected.
    pub fn mark_disconnected(&mut self, key: DeviceKey, at: SystemTime) -> Option<RecordHandle> {
        let handle = self.find(key)?;
        let pos = self.inner.position(handle)?;

        if self.inner.records[pos].record.mark_disconnected(at) {
            Some(handle)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    fn evict_oldest_disconnected(&mut self) -> Option<RecordHandle> {
        let pos = self
            .inner
            .records
            .iter()
            .position(|stored| !stored.record.is_connected())?;

        let stored = self.inner.records.remove(pos);
        let key = stored.record.key();
        if self.inner.latest.get(&key) == Some(&stored.handle) {
            self.inner.latest.remove(&key);
        }

        debug!("Evicted record {:?} ({})", stored.handle, key);
        Some(stored.handle)
    }
}

/// Consistent copy of the inventory taken under the read lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySnapshot {
    records: Vec<StoredRecord>,
    capacity: usize,
}

impl InventorySnapshot {
    /// Snapshot built directly from records, in the given order
    pub fn from_records<I>(records: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = DeviceRecord>,
    {
        let records = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| StoredRecord {
                handle: RecordHandle(i as u64 + 1),
                record,
            })
            .collect();
        Self { records, capacity }
    }

    pub fn records(&self) -> &[StoredRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn connected_count(&self) -> usize {
        self.records
            .iter()
            .filter(|stored| stored.record.is_connected())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DeviceIdentity, DeviceStrings};
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn record(bus: u8, address: u8, secs: u64) -> DeviceRecord {
        DeviceRecord::new(
            DeviceIdentity::new(bus, address, 0x1234, 0x5678),
            DeviceStrings::new(Some("Acme"), Some("Widget"), Some("SN1")),
            at(secs),
        )
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            InventoryStore::new(0, OverflowPolicy::RejectNewest),
            Err(InventoryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_store_reports_limits() {
        let store = InventoryStore::new(3, OverflowPolicy::EvictOldestDisconnected).unwrap();
        assert_eq!(store.capacity(), 3);
        assert_eq!(store.policy(), OverflowPolicy::EvictOldestDisconnected);

        store.insert(record(1, 1, 10)).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.capacity(), 3);
        assert_eq!(snapshot.len(), 1);

        let defaults = InventoryStore::with_default_capacity().unwrap();
        assert_eq!(defaults.capacity(), DEFAULT_CAPACITY);
        assert_eq!(defaults.policy(), OverflowPolicy::RejectNewest);
    }

    #[test]
    fn test_insert_preserves_order() {
        let store = InventoryStore::new(8, OverflowPolicy::RejectNewest).unwrap();

        let h1 = store.insert(record(1, 5, 10)).unwrap();
        let h2 = store.insert(record(1, 2, 11)).unwrap();
        let h3 = store.insert(record(2, 1, 12)).unwrap();
        assert!(h1 < h2 && h2 < h3);

        let snapshot = store.snapshot();
        let addresses: Vec<u8> = snapshot.iter().map(|s| s.record.key().address).collect();
        assert_eq!(addresses, vec![5, 2, 1]);
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_find_returns_latest() {
        let store = InventoryStore::new(8, OverflowPolicy::RejectNewest).unwrap();
        let key = DeviceKey::new(1, 2);

        assert_eq!(store.find(key), None);

        let first = store.insert(record(1, 2, 10)).unwrap();
        assert_eq!(store.find(key), Some(first));

        store.mark_disconnected(key, at(20)).unwrap();
        let second = store.insert(record(1, 2, 30)).unwrap();
        assert_eq!(store.find(key), Some(second));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_mark_disconnected_unknown_key_is_noop() {
        let store = InventoryStore::new(8, OverflowPolicy::RejectNewest).unwrap();
        store.insert(record(1, 2, 10)).unwrap();

        let changed = store.mark_disconnected(DeviceKey::new(9, 9), at(20)).unwrap();
        assert_eq!(changed, None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.connected_count(), 1);
    }

    #[test]
    fn test_mark_disconnected_sets_removed_once() {
        let store = InventoryStore::new(8, OverflowPolicy::RejectNewest).unwrap();
        let key = DeviceKey::new(1, 2);
        let handle = store.insert(record(1, 2, 10)).unwrap();

        assert_eq!(store.mark_disconnected(key, at(20)).unwrap(), Some(handle));
        assert_eq!(store.mark_disconnected(key, at(30)).unwrap(), None);

        let stored = store.get(handle).unwrap();
        assert!(!stored.is_connected());
        assert_eq!(stored.removed_at(), Some(at(20)));
    }

    #[test]
    fn test_reject_newest_when_full() {
        let store = InventoryStore::new(2, OverflowPolicy::RejectNewest).unwrap();
        store.insert(record(1, 1, 10)).unwrap();
        store.insert(record(1, 2, 11)).unwrap();

        let err = store.insert(record(1, 3, 12)).unwrap_err();
        assert_eq!(err, InventoryError::StoreFull { capacity: 2 });
        assert_eq!(store.len(), 2);
        assert_eq!(store.find(DeviceKey::new(1, 3)), None);
    }

    #[test]
    fn test_evict_oldest_disconnected() {
        let store = InventoryStore::new(2, OverflowPolicy::EvictOldestDisconnected).unwrap();
        let first = store.insert(record(1, 1, 10)).unwrap();
        store.insert(record(1, 2, 11)).unwrap();
        store.mark_disconnected(DeviceKey::new(1, 1), at(12)).unwrap();

        let mut writer = store.try_write().unwrap();
        let inserted = writer.insert(record(1, 3, 13)).unwrap();
        drop(writer);

        assert_eq!(inserted.evicted, Some(first));
        assert_eq!(store.len(), 2);
        assert_eq!(store.find(DeviceKey::new(1, 1)), None);
        assert!(store.get(first).is_none());
    }

    #[test]
    fn test_evict_keeps_index_of_newer_record() {
        let store = InventoryStore::new(2, OverflowPolicy::EvictOldestDisconnected).unwrap();
        let key = DeviceKey::new(1, 1);
        store.insert(record(1, 1, 10)).unwrap();
        store.mark_disconnected(key, at(11)).unwrap();
        let newer = store.insert(record(1, 1, 12)).unwrap();

        // The store is full; the old interval of the same key gets evicted
        store.insert(record(1, 2, 13)).unwrap();
        assert_eq!(store.find(key), Some(newer));
    }

    #[test]
    fn test_evict_fails_when_all_connected() {
        let store = InventoryStore::new(1, OverflowPolicy::EvictOldestDisconnected).unwrap();
        store.insert(record(1, 1, 10)).unwrap();

        assert_eq!(
            store.insert(record(1, 2, 11)).unwrap_err(),
            InventoryError::StoreFull { capacity: 1 }
        );
    }

    #[test]
    fn test_try_write_contended_by_reader() {
        let store = InventoryStore::new(4, OverflowPolicy::RejectNewest).unwrap();
        let view = store.view();

        assert!(matches!(
            store.try_write(),
            Err(InventoryError::LockContended)
        ));
        assert!(store.insert(record(1, 1, 10)).is_err());
        drop(view);

        assert!(store.insert(record(1, 1, 10)).is_ok());
    }

    #[test]
    fn test_writer_compound_operation() {
        let store = InventoryStore::new(4, OverflowPolicy::RejectNewest).unwrap();
        let key = DeviceKey::new(3, 4);

        let mut writer = store.try_write().unwrap();
        assert!(!writer.is_connected(key));
        writer.insert(record(3, 4, 10)).unwrap();
        assert!(writer.is_connected(key));
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn test_overflow_policy_from_str() {
        assert_eq!(
            "reject-newest".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::RejectNewest
        );
        assert_eq!(
            "evict-oldest-disconnected".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::EvictOldestDisconnected
        );
        assert!("evict-newest".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let store = InventoryStore::new(4, OverflowPolicy::RejectNewest).unwrap();
        store.insert(record(1, 2, 10)).unwrap();

        let before = store.snapshot();
        store.mark_disconnected(DeviceKey::new(1, 2), at(11)).unwrap();

        assert_eq!(before.connected_count(), 1);
        assert_eq!(store.snapshot().connected_count(), 0);
    }
}
