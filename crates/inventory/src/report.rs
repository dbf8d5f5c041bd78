//! Textual inventory report
//!
//! Rendering only ever looks at an [`InventorySnapshot`] that was copied out
//! of the store, so it runs without holding any lock and produces the same
//! bytes for the same snapshot.

use crate::counters::{DispatchCounters, DispatchStats};
use crate::record::DeviceRecord;
use crate::store::{InventorySnapshot, InventoryStore, StoredRecord};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Report title line
pub const REPORT_TITLE: &str = "USB Activity Monitor";

/// Line rendered in place of the device list when nothing was recorded
pub const EMPTY_INVENTORY: &str = "No devices recorded.";

/// Render a snapshot, optionally followed by event counters
pub fn render(snapshot: &InventorySnapshot, stats: Option<&DispatchStats>) -> String {
    Report { snapshot, stats }.to_string()
}

/// Display adapter producing the full report
pub struct Report<'a> {
    pub snapshot: &'a InventorySnapshot,
    pub stats: Option<&'a DispatchStats>,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", REPORT_TITLE)?;
        writeln!(
            f,
            "Devices: {} ({} connected)",
            self.snapshot.len(),
            self.snapshot.connected_count()
        )?;
        writeln!(f)?;

        if self.snapshot.is_empty() {
            writeln!(f, "{}", EMPTY_INVENTORY)?;
        }

        for (index, stored) in self.snapshot.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write_record(f, index + 1, stored)?;
        }

        if let Some(stats) = self.stats {
            writeln!(f)?;
            write_stats(f, stats)?;
        }

        Ok(())
    }
}

fn write_record(f: &mut fmt::Formatter<'_>, position: usize, stored: &StoredRecord) -> fmt::Result {
    let record: &DeviceRecord = &stored.record;
    let identity = record.identity();

    writeln!(
        f,
        "[{}] {} ID {:04x}:{:04x}",
        position, identity.key, identity.vendor_id, identity.product_id
    )?;
    writeln!(f, "    Manufacturer: {}", record.manufacturer())?;
    writeln!(f, "    Product:      {}", record.product())?;
    writeln!(f, "    Serial:       {}", record.serial())?;
    writeln!(f, "    Added:        {}", format_timestamp(record.added_at()))?;
    if let Some(removed_at) = record.removed_at() {
        writeln!(f, "    Removed:      {}", format_timestamp(removed_at))?;
    }
    writeln!(f, "    Status:       {}", status_label(record))
}

fn write_stats(f: &mut fmt::Formatter<'_>, stats: &DispatchStats) -> fmt::Result {
    writeln!(
        f,
        "Events: admitted={} rejected={} duplicates={} disconnects={} ignored={}",
        stats.admitted, stats.rejected, stats.duplicates, stats.disconnects, stats.ignored
    )?;
    writeln!(
        f,
        "Dropped: malformed={} store_full={} lock_contended={} source_overflow={} (deferred={} evicted={})",
        stats.malformed,
        stats.store_full,
        stats.dropped_contended,
        stats.source_overflow,
        stats.deferred,
        stats.evicted
    )
}

/// Status marker shown for a record
pub fn status_label(record: &DeviceRecord) -> &'static str {
    if record.is_connected() {
        "Connected"
    } else {
        "Disconnected"
    }
}

/// Renders reports from a live store
///
/// Each call takes a fresh snapshot; nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    store: Arc<InventoryStore>,
    counters: Option<Arc<DispatchCounters>>,
}

impl ReportRenderer {
    pub fn new(store: Arc<InventoryStore>) -> Self {
        Self {
            store,
            counters: None,
        }
    }

    /// Append the dispatcher's event counters to every report
    pub fn with_counters(mut self, counters: Arc<DispatchCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn render(&self) -> String {
        let snapshot = self.store.snapshot();
        let stats = self.counters.as_ref().map(|c| c.stats());
        render(&snapshot, stats.as_ref())
    }
}

/// Format a wall-clock time as UTC ISO 8601 with milliseconds
///
/// Times before the Unix epoch render as the epoch.
pub fn format_timestamp(time: SystemTime) -> String {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = since_epoch.as_secs();
    let millis = since_epoch.subsec_millis();

    let (year, month, day) = civil_date(secs / 86_400);
    let secs_of_day = secs % 86_400;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        year,
        month,
        day,
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60,
        millis
    )
}

/// Days since 1970-01-01 to (year, month, day)
///
/// Constant time for any day count: works in 400-year eras of the
/// proleptic Gregorian calendar, with years starting on March 1st.
fn civil_date(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let day_of_era = z % 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1_460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let shifted_month = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * shifted_month + 2) / 5 + 1;
    let month = if shifted_month < 10 {
        shifted_month + 3
    } else {
        shifted_month - 9
    };
    let year = era * 400 + year_of_era + u64::from(month <= 2);

    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DeviceIdentity, DeviceStrings};
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn record(address: u8, added: u64, removed: Option<u64>) -> DeviceRecord {
        let mut record = DeviceRecord::new(
            DeviceIdentity::new(1, address, 0x1234, 0x5678),
            DeviceStrings::new(Some("Acme"), Some("Widget"), Some("SN1")),
            at(added),
        );
        if let Some(removed) = removed {
            record.mark_disconnected(at(removed));
        }
        record
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(UNIX_EPOCH), "1970-01-01T00:00:00.000Z");
        assert_eq!(
            format_timestamp(at(951_782_400)),
            "2000-02-29T00:00:00.000Z"
        );
        assert_eq!(
            format_timestamp(at(1_700_000_000) + Duration::from_millis(250)),
            "2023-11-14T22:13:20.250Z"
        );
        assert_eq!(
            format_timestamp(UNIX_EPOCH - Duration::from_secs(5)),
            "1970-01-01T00:00:00.000Z"
        );
    }

    #[test]
    fn test_format_timestamp_calendar_edges() {
        // 2100 is not a leap year
        assert_eq!(format_timestamp(at(4_107_456_000)), "2100-02-28T00:00:00.000Z");
        assert_eq!(format_timestamp(at(4_107_542_400)), "2100-03-01T00:00:00.000Z");
        assert_eq!(format_timestamp(at(951_868_800)), "2000-03-01T00:00:00.000Z");
        assert_eq!(format_timestamp(at(253_402_300_799)), "9999-12-31T23:59:59.000Z");
    }

    #[test]
    fn test_format_timestamp_far_future() {
        assert_eq!(
            format_timestamp(at(31_810_354_300_800)),
            "1010000-01-01T00:00:00.000Z"
        );
    }

    #[test]
    fn test_render_empty() {
        let snapshot = InventorySnapshot::from_records([], 8);
        let report = render(&snapshot, None);

        assert_eq!(
            report,
            "USB Activity Monitor\nDevices: 0 (0 connected)\n\nNo devices recorded.\n"
        );
    }

    #[test]
    fn test_render_connected_record() {
        let snapshot = InventorySnapshot::from_records([record(2, 0, None)], 8);
        let report = render(&snapshot, None);

        let expected = "\
USB Activity Monitor
Devices: 1 (1 connected)

[1] Bus 001 Device 002 ID 1234:5678
    Manufacturer: Acme
    Product:      Widget
    Serial:       SN1
    Added:        1970-01-01T00:00:00.000Z
    Status:       Connected
";
        assert_eq!(report, expected);
    }

    #[test]
    fn test_render_disconnected_record_has_removed_line() {
        let snapshot = InventorySnapshot::from_records([record(2, 10, Some(70))], 8);
        let report = render(&snapshot, None);

        assert!(report.contains("    Removed:      1970-01-01T00:01:10.000Z\n"));
        assert!(report.contains("    Status:       Disconnected\n"));
        assert!(report.contains("Devices: 1 (0 connected)"));
    }

    #[test]
    fn test_render_keeps_insertion_order() {
        let snapshot = InventorySnapshot::from_records(
            [record(9, 1, Some(2)), record(3, 3, None), record(5, 4, None)],
            8,
        );
        let report = render(&snapshot, None);

        let first = report.find("Device 009").unwrap();
        let second = report.find("Device 003").unwrap();
        let third = report.find("Device 005").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn test_render_is_deterministic() {
        let snapshot =
            InventorySnapshot::from_records([record(2, 10, Some(20)), record(3, 30, None)], 8);
        let stats = DispatchStats {
            admitted: 2,
            disconnects: 1,
            ..Default::default()
        };

        assert_eq!(
            render(&snapshot, Some(&stats)),
            render(&snapshot, Some(&stats))
        );
    }

    #[test]
    fn test_render_stats_footer() {
        let snapshot = InventorySnapshot::from_records([], 8);
        let stats = DispatchStats {
            admitted: 3,
            rejected: 1,
            malformed: 2,
            ..Default::default()
        };
        let report = render(&snapshot, Some(&stats));

        assert!(report.contains("Events: admitted=3 rejected=1"));
        assert!(report.contains("Dropped: malformed=2"));
    }
}
