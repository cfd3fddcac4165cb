//! # Mile Log
//!
//! Append-only history of mile changes, keyed by trail section.
//!
//! Entries are kept most-recent-first. Every entry is written to the
//! document store before it becomes visible, so the log survives restarts
//! and a failed write leaves the log unchanged.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrailMilesError};
use crate::session::MileChangeCallback;
use crate::store::DocumentStore;
use crate::{MileChange, Position};

/// Collection the log is persisted under.
pub const MILE_LOG_COLLECTION: &str = "mile_logs";

/// One recorded mile change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MileLogEntry {
    /// Unique, strictly increasing in recording order
    pub id: u64,
    pub section_id: String,
    pub mile: f64,
    pub previous_mile: Option<f64>,
    pub position: Position,
    pub timestamp: DateTime<Utc>,
    pub accuracy: Option<f64>,
}

/// Input to [`MileLog::record`].
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub section_id: String,
    pub mile: f64,
    pub previous_mile: Option<f64>,
    pub position: Position,
    /// Defaults to the time of recording
    pub timestamp: Option<DateTime<Utc>>,
}

/// First and last mile of a set of entries, by time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MileRange {
    pub first: f64,
    pub last: f64,
    /// Absolute difference between `first` and `last`
    pub spread: f64,
}

/// Aggregate statistics over log entries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MileLogStats {
    pub total_updates: usize,
    pub distinct_miles_tracked: usize,
    pub first_update_at: Option<DateTime<Utc>>,
    pub last_update_at: Option<DateTime<Utc>>,
    /// Mean reported accuracy in whole meters, 0 when none was reported
    pub average_accuracy: f64,
    pub mile_range: Option<MileRange>,
}

/// Persisted, queryable log of mile changes.
pub struct MileLog {
    store: Box<dyn DocumentStore>,
    /// Most recent first
    entries: Vec<MileLogEntry>,
}

impl MileLog {
    /// Open the log on a store, loading any persisted entries.
    pub fn open(store: Box<dyn DocumentStore>) -> Result<Self> {
        let entries = load_entries(store.as_ref())?;
        info!("[MileLog] Loaded {} entries", entries.len());
        Ok(Self { store, entries })
    }

    /// Reload entries from the store after a failed multi-record write, so
    /// memory matches whatever the store kept.
    fn resync(&mut self) {
        match load_entries(self.store.as_ref()) {
            Ok(entries) => self.entries = entries,
            Err(e) => error!("[MileLog] Failed to reload entries: {}", e),
        }
    }

    /// Record a mile change and persist it.
    pub fn record(&mut self, new_entry: NewLogEntry) -> Result<MileLogEntry> {
        let accuracy = new_entry.position.accuracy;
        let entry = MileLogEntry {
            id: self.next_id()?,
            section_id: new_entry.section_id,
            mile: new_entry.mile,
            previous_mile: new_entry.previous_mile,
            timestamp: new_entry.timestamp.unwrap_or_else(Utc::now),
            position: new_entry.position,
            accuracy,
        };

        self.persist(&entry)?;
        self.entries.insert(0, entry.clone());

        debug!(
            "[MileLog] Logged mile {} for section {} (previous {:?})",
            entry.mile, entry.section_id, entry.previous_mile
        );
        Ok(entry)
    }

    /// Time-based id, bumped past the newest entry so ids never repeat.
    fn next_id(&self) -> Result<u64> {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        match self.entries.first() {
            Some(newest) => newest
                .id
                .checked_add(1)
                .map(|next| now.max(next))
                .ok_or_else(|| {
                    TrailMilesError::persistence(format!(
                        "mile log id space exhausted after id {}",
                        newest.id
                    ))
                }),
            None => Ok(now),
        }
    }

    fn persist(&mut self, entry: &MileLogEntry) -> Result<()> {
        let record = serde_json::to_value(entry)
            .map_err(|e| TrailMilesError::persistence(e.to_string()))?;
        self.store
            .put(MILE_LOG_COLLECTION, &entry.id.to_string(), &record)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All entries, most recent first.
    pub fn entries(&self) -> &[MileLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_for_section(&self, section_id: &str) -> Vec<MileLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.section_id == section_id)
            .cloned()
            .collect()
    }

    /// The `count` most recent entries.
    pub fn recent_entries(&self, count: usize) -> Vec<MileLogEntry> {
        self.entries.iter().take(count).cloned().collect()
    }

    /// Entries timestamped within `[start, end]`, most recent first.
    pub fn entries_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<MileLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Statistics over one section, or over the whole log.
    pub fn statistics(&self, section_id: Option<&str>) -> MileLogStats {
        let relevant: Vec<&MileLogEntry> = self
            .entries
            .iter()
            .filter(|e| section_id.map_or(true, |id| e.section_id == id))
            .collect();

        // Oldest first: on equal timestamps min_by_key keeps the older entry
        // and max_by_key the newer one
        let Some(first) = relevant.iter().rev().min_by_key(|e| e.timestamp) else {
            return MileLogStats::default();
        };
        let last = relevant.iter().rev().max_by_key(|e| e.timestamp).unwrap_or(first);

        let accuracies: Vec<f64> = relevant
            .iter()
            .filter_map(|e| e.accuracy)
            .filter(|a| *a > 0.0)
            .collect();
        let average_accuracy = if accuracies.is_empty() {
            0.0
        } else {
            (accuracies.iter().sum::<f64>() / accuracies.len() as f64).round()
        };

        let distinct: HashSet<u64> = relevant.iter().map(|e| e.mile.to_bits()).collect();

        MileLogStats {
            total_updates: relevant.len(),
            distinct_miles_tracked: distinct.len(),
            first_update_at: Some(first.timestamp),
            last_update_at: Some(last.timestamp),
            average_accuracy,
            mile_range: Some(MileRange {
                first: first.mile,
                last: last.mile,
                spread: (last.mile - first.mile).abs(),
            }),
        }
    }

    // ========================================================================
    // Clearing
    // ========================================================================

    pub fn clear_all(&mut self) -> Result<()> {
        self.store.clear(MILE_LOG_COLLECTION)?;
        let removed = self.entries.len();
        self.entries.clear();
        info!("[MileLog] Cleared {} entries", removed);
        Ok(())
    }

    pub fn clear_for_section(&mut self, section_id: &str) -> Result<()> {
        let records = self.store.query_by_field(
            MILE_LOG_COLLECTION,
            "sectionId",
            &Value::String(section_id.to_string()),
        )?;
        for record in &records {
            if let Some(id) = record.get("id").and_then(Value::as_u64) {
                if let Err(e) = self.store.delete(MILE_LOG_COLLECTION, &id.to_string()) {
                    error!("[MileLog] Clearing section {} failed: {}", section_id, e);
                    self.resync();
                    return Err(e);
                }
            }
        }

        self.entries.retain(|e| e.section_id != section_id);
        info!(
            "[MileLog] Cleared {} entries for section {}",
            records.len(),
            section_id
        );
        Ok(())
    }

    // ========================================================================
    // Import / export
    // ========================================================================

    /// The whole log as a pretty-printed JSON array, most recent first.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    /// Replace the log with entries from a JSON array.
    ///
    /// A malformed document leaves the log untouched. A store failure
    /// restores the previous entries. Returns the number of entries now in
    /// the log; entries sharing an id collapse into one.
    pub fn import_json(&mut self, json: &str) -> Result<usize> {
        let mut imported: Vec<MileLogEntry> = serde_json::from_str(json)?;
        imported.sort_by(|a, b| b.id.cmp(&a.id));
        imported.dedup_by_key(|e| e.id);

        if let Err(e) = self.rewrite(&imported) {
            error!("[MileLog] Import failed, restoring previous entries: {}", e);
            let previous = self.entries.clone();
            if let Err(restore) = self.rewrite(&previous) {
                error!("[MileLog] Failed to restore previous entries: {}", restore);
                self.resync();
            }
            return Err(e);
        }
        self.entries = imported;

        info!("[MileLog] Imported {} entries", self.entries.len());
        Ok(self.entries.len())
    }

    /// Replace the stored collection with `entries` (most recent first).
    fn rewrite(&mut self, entries: &[MileLogEntry]) -> Result<()> {
        self.store.clear(MILE_LOG_COLLECTION)?;
        // Oldest first so store order matches recording order
        for entry in entries.iter().rev() {
            self.persist(entry)?;
        }
        Ok(())
    }
}

/// Persisted entries, most recent first.
fn load_entries(store: &dyn DocumentStore) -> Result<Vec<MileLogEntry>> {
    let mut entries = store
        .all(MILE_LOG_COLLECTION)?
        .into_iter()
        .map(serde_json::from_value::<MileLogEntry>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| TrailMilesError::persistence(format!("corrupt mile log entry: {}", e)))?;
    entries.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(entries)
}

/// Callback that records every resolved mile change for `section_id`.
///
/// Changes that leave snap range (`mile == None`) are not recorded. Write
/// failures are logged and swallowed so they never disturb the position
/// stream.
pub fn recorder(log: Arc<Mutex<MileLog>>, section_id: impl Into<String>) -> MileChangeCallback {
    let section_id = section_id.into();
    Arc::new(move |change: &MileChange| {
        let Some(mile) = change.mile else {
            debug!("[MileLog] Position left snap range, nothing to record");
            return;
        };

        let mut log = log.lock().unwrap_or_else(PoisonError::into_inner);
        let result = log.record(NewLogEntry {
            section_id: section_id.clone(),
            mile,
            previous_mile: change.previous_mile,
            position: change.position.clone(),
            timestamp: Some(change.timestamp),
        });
        if let Err(e) = result {
            error!("[MileLog] Failed to record mile {}: {}", mile, e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn position(lat: f64, lng: f64, accuracy: Option<f64>) -> Position {
        Position {
            lat,
            lng,
            timestamp: Utc::now(),
            accuracy,
        }
    }

    fn new_entry(section: &str, mile: f64, previous: Option<f64>) -> NewLogEntry {
        NewLogEntry {
            section_id: section.to_string(),
            mile,
            previous_mile: previous,
            position: position(32.5951, -116.4656, Some(10.0)),
            timestamp: None,
        }
    }

    fn memory_log() -> MileLog {
        MileLog::open(Box::new(MemoryStore::new())).unwrap()
    }

    /// Store whose writes always fail.
    struct FailingStore;

    impl DocumentStore for FailingStore {
        fn put(&mut self, _: &str, _: &str, _: &Value) -> Result<()> {
            Err(TrailMilesError::persistence("disk full"))
        }
        fn get(&self, _: &str, _: &str) -> Result<Option<Value>> {
            Ok(None)
        }
        fn delete(&mut self, _: &str, _: &str) -> Result<bool> {
            Ok(false)
        }
        fn all(&self, _: &str) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
        fn clear(&mut self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    /// In-memory store that fails one specific put or delete call.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_put_at: Option<usize>,
        fail_delete_at: Option<usize>,
        puts: usize,
        deletes: usize,
    }

    impl DocumentStore for FlakyStore {
        fn put(&mut self, collection: &str, id: &str, record: &Value) -> Result<()> {
            self.puts += 1;
            if self.fail_put_at == Some(self.puts) {
                return Err(TrailMilesError::persistence("disk full"));
            }
            self.inner.put(collection, id, record)
        }
        fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
            self.inner.get(collection, id)
        }
        fn delete(&mut self, collection: &str, id: &str) -> Result<bool> {
            self.deletes += 1;
            if self.fail_delete_at == Some(self.deletes) {
                return Err(TrailMilesError::persistence("disk full"));
            }
            self.inner.delete(collection, id)
        }
        fn all(&self, collection: &str) -> Result<Vec<Value>> {
            self.inner.all(collection)
        }
        fn clear(&mut self, collection: &str) -> Result<()> {
            self.inner.clear(collection)
        }
    }

    #[test]
    fn test_record_then_query_section() {
        let mut log = memory_log();
        log.record(new_entry("s1", 0.0, None)).unwrap();
        let entry = log.record(new_entry("s1", 1.0, Some(0.0))).unwrap();

        let entries = log.entries_for_section("s1");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], entry);
        assert_eq!(entries.iter().filter(|e| e.id == entry.id).count(), 1);
        assert_eq!(entry.accuracy, Some(10.0));
    }

    #[test]
    fn test_ids_unique_and_increasing() {
        let mut log = memory_log();
        let ids: Vec<u64> = (0..20)
            .map(|i| log.record(new_entry("s1", i as f64, None)).unwrap().id)
            .collect();

        for pair in ids.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_section_filter() {
        let mut log = memory_log();
        log.record(new_entry("s1", 0.0, None)).unwrap();
        log.record(new_entry("s2", 5.0, None)).unwrap();

        assert_eq!(log.entries_for_section("s2").len(), 1);
        assert!(log.entries_for_section("nope").is_empty());
    }

    #[test]
    fn test_recent_entries() {
        let mut log = memory_log();
        for mile in 0..5 {
            log.record(new_entry("s1", mile as f64, None)).unwrap();
        }

        let recent = log.recent_entries(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].mile, 4.0);
        assert_eq!(recent[1].mile, 3.0);
        assert_eq!(log.recent_entries(50).len(), 5);
    }

    #[test]
    fn test_entries_between() {
        let mut log = memory_log();
        let base = Utc::now();
        for (mile, offset) in [(0.0, 0), (1.0, 10), (2.0, 20)] {
            let mut entry = new_entry("s1", mile, None);
            entry.timestamp = Some(base + Duration::minutes(offset));
            log.record(entry).unwrap();
        }

        let hits = log.entries_between(base + Duration::minutes(5), base + Duration::minutes(20));
        let miles: Vec<f64> = hits.iter().map(|e| e.mile).collect();
        assert_eq!(miles, vec![2.0, 1.0]);
    }

    #[test]
    fn test_statistics_empty() {
        let log = memory_log();
        let stats = log.statistics(None);
        assert_eq!(stats.total_updates, 0);
        assert_eq!(stats.distinct_miles_tracked, 0);
        assert_eq!(stats.first_update_at, None);
        assert_eq!(stats.average_accuracy, 0.0);
        assert_eq!(stats.mile_range, None);

        assert_eq!(log.statistics(Some("s1")).total_updates, 0);
    }

    #[test]
    fn test_statistics() {
        let mut log = memory_log();
        let base = Utc::now();
        let samples = [
            (3.0, 0, Some(10.0)),
            (4.0, 5, Some(21.0)),
            (3.0, 10, None),
            (7.0, 15, Some(0.0)),
        ];
        for (mile, offset, accuracy) in samples {
            log.record(NewLogEntry {
                section_id: "s1".to_string(),
                mile,
                previous_mile: None,
                position: position(32.6, -116.5, accuracy),
                timestamp: Some(base + Duration::minutes(offset)),
            })
            .unwrap();
        }
        log.record(new_entry("s2", 100.0, None)).unwrap();

        let stats = log.statistics(Some("s1"));
        assert_eq!(stats.total_updates, 4);
        assert_eq!(stats.distinct_miles_tracked, 3);
        assert_eq!(stats.first_update_at, Some(base));
        assert_eq!(stats.last_update_at, Some(base + Duration::minutes(15)));
        // Zero and missing accuracies are ignored: (10 + 21) / 2 rounds to 16
        assert_eq!(stats.average_accuracy, 16.0);
        assert_eq!(
            stats.mile_range,
            Some(MileRange {
                first: 3.0,
                last: 7.0,
                spread: 4.0
            })
        );

        assert_eq!(log.statistics(None).total_updates, 5);
    }

    #[test]
    fn test_clear_for_section() {
        let mut log = memory_log();
        log.record(new_entry("s1", 0.0, None)).unwrap();
        log.record(new_entry("s2", 1.0, None)).unwrap();
        log.record(new_entry("s1", 2.0, None)).unwrap();

        log.clear_for_section("s1").unwrap();
        assert!(log.entries_for_section("s1").is_empty());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_clear_all() {
        let mut log = memory_log();
        log.record(new_entry("s1", 0.0, None)).unwrap();
        log.clear_all().unwrap();
        assert!(log.is_empty());
        assert_eq!(log.statistics(None).total_updates, 0);
    }

    #[test]
    fn test_failed_write_leaves_log_unchanged() {
        let mut log = MileLog::open(Box::new(FailingStore)).unwrap();
        let err = log.record(new_entry("s1", 0.0, None)).unwrap_err();
        assert!(matches!(err, TrailMilesError::Persistence { .. }));
        assert!(log.is_empty());
    }

    #[test]
    fn test_export_import() {
        let mut log = memory_log();
        log.record(new_entry("s1", 0.0, None)).unwrap();
        log.record(new_entry("s1", 1.0, Some(0.0))).unwrap();
        let exported = log.export_json().unwrap();

        let mut other = memory_log();
        assert_eq!(other.import_json(&exported).unwrap(), 2);
        assert_eq!(other.entries(), log.entries());
    }

    #[test]
    fn test_failed_import_keeps_previous_entries() {
        let store = FlakyStore {
            fail_put_at: Some(3),
            ..FlakyStore::default()
        };
        let mut log = MileLog::open(Box::new(store)).unwrap();
        let kept = log.record(new_entry("s1", 0.0, None)).unwrap();

        let mut source = memory_log();
        source.record(new_entry("s2", 4.0, None)).unwrap();
        source.record(new_entry("s2", 5.0, Some(4.0))).unwrap();
        let exported = source.export_json().unwrap();

        let err = log.import_json(&exported).unwrap_err();
        assert!(matches!(err, TrailMilesError::Persistence { .. }));
        assert_eq!(log.entries(), &[kept.clone()]);

        // The store was restored too, so later writes build on the old log
        let next = log.record(new_entry("s1", 1.0, Some(0.0))).unwrap();
        assert!(next.id > kept.id);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_failed_clear_for_section_reloads_from_store() {
        let store = FlakyStore {
            fail_delete_at: Some(2),
            ..FlakyStore::default()
        };
        let mut log = MileLog::open(Box::new(store)).unwrap();
        log.record(new_entry("s1", 0.0, None)).unwrap();
        log.record(new_entry("s2", 1.0, None)).unwrap();
        log.record(new_entry("s1", 2.0, None)).unwrap();

        assert!(log.clear_for_section("s1").is_err());

        // The first delete went through; memory reflects that
        assert_eq!(log.len(), 2);
        let remaining = log.entries_for_section("s1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].mile, 2.0);
    }

    #[test]
    fn test_record_after_largest_id_fails_cleanly() {
        let mut log = memory_log();
        let mut last = log.record(new_entry("s1", 0.0, None)).unwrap();
        last.id = u64::MAX;
        let json = serde_json::to_string(&vec![last]).unwrap();
        assert_eq!(log.import_json(&json).unwrap(), 1);

        let err = log.record(new_entry("s1", 1.0, Some(0.0))).unwrap_err();
        assert!(matches!(err, TrailMilesError::Persistence { .. }));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].id, u64::MAX);
    }

    #[test]
    fn test_import_rejects_non_array() {
        let mut log = memory_log();
        log.record(new_entry("s1", 0.0, None)).unwrap();

        assert!(matches!(
            log.import_json(r#"{"not": "an array"}"#),
            Err(TrailMilesError::Parse { .. })
        ));
        assert!(log.import_json("garbage").is_err());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_recorder_skips_unresolved_miles() {
        let log = Arc::new(Mutex::new(memory_log()));
        let callback = recorder(Arc::clone(&log), "s1");

        let pos = position(32.5951, -116.4656, Some(5.0));
        callback(&MileChange {
            mile: Some(0.0),
            previous_mile: None,
            position: pos.clone(),
            timestamp: pos.timestamp,
        });
        callback(&MileChange {
            mile: None,
            previous_mile: Some(0.0),
            position: pos.clone(),
            timestamp: pos.timestamp,
        });

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].mile, 0.0);
        assert_eq!(log.entries()[0].section_id, "s1");
    }

    #[test]
    fn test_recorder_swallows_write_errors() {
        let log = Arc::new(Mutex::new(MileLog::open(Box::new(FailingStore)).unwrap()));
        let callback = recorder(Arc::clone(&log), "s1");

        let pos = position(32.5951, -116.4656, None);
        callback(&MileChange {
            mile: Some(0.0),
            previous_mile: None,
            position: pos.clone(),
            timestamp: pos.timestamp,
        });

        assert!(log.lock().unwrap().is_empty());
    }
}
