//! Dispatch counters
//!
//! Lock-free tallies of what happened to every event the dispatcher saw.
//! They are updated from the event path with relaxed atomics and read by
//! the report path through [`DispatchStats`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Event outcome counters shared by the dispatcher and its readers
#[derive(Debug, Default)]
pub struct DispatchCounters {
    admitted: AtomicU64,
    rejected: AtomicU64,
    duplicates: AtomicU64,
    disconnects: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
    store_full: AtomicU64,
    deferred: AtomicU64,
    dropped_contended: AtomicU64,
    evicted: AtomicU64,
    source_overflow: AtomicU64,
}

impl DispatchCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_full(&self) {
        self.store_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_contended(&self) {
        self.dropped_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an event the event source had to drop before dispatch
    ///
    /// Used by sources that buffer notifications between their callback and
    /// the dispatcher and run out of room.
    pub fn record_source_overflow(&self) {
        self.source_overflow.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values of every counter
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            store_full: self.store_full.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            dropped_contended: self.dropped_contended.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            source_overflow: self.source_overflow.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DispatchCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Connects that created a record
    pub admitted: u64,
    /// Connects refused by the admission filter
    pub rejected: u64,
    /// Connects for a key that was already connected
    pub duplicates: u64,
    /// Disconnects that changed a record
    pub disconnects: u64,
    /// Disconnects for unknown or already disconnected keys
    pub ignored: u64,
    /// Events without a readable identity
    pub malformed: u64,
    /// Connects refused because the store was full
    pub store_full: u64,
    /// Events queued because the store lock was busy
    pub deferred: u64,
    /// Events dropped because the lock was busy and the queue full
    pub dropped_contended: u64,
    /// Records removed by the overflow policy
    pub evicted: u64,
    /// Events dropped by the event source before dispatch
    pub source_overflow: u64,
}

impl DispatchStats {
    /// Events that were lost for any reason
    pub fn dropped(&self) -> u64 {
        self.malformed + self.store_full + self.dropped_contended + self.source_overflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let counters = DispatchCounters::new();
        assert_eq!(counters.stats(), DispatchStats::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let counters = DispatchCounters::new();
        counters.record_admitted();
        counters.record_admitted();
        counters.record_rejected();
        counters.record_malformed();
        counters.record_source_overflow();

        let stats = counters.stats();
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.dropped(), 2);
    }
}
