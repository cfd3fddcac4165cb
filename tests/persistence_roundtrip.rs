//! Mile log persistence across reopen, backed by SQLite.

#![cfg(feature = "persistence")]

use std::sync::{Arc, Mutex};

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;
use trail_miles::mile_log::recorder;
use trail_miles::{MileChange, MileLog, NewLogEntry, Position, SqliteStore};

fn open_log(dir: &TempDir) -> MileLog {
    let path = dir.path().join("trail_miles.db");
    let store = SqliteStore::new(path.to_str().unwrap()).unwrap();
    MileLog::open(Box::new(store)).unwrap()
}

#[test]
fn test_entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let start = Utc.with_ymd_and_hms(2024, 4, 20, 6, 0, 0).unwrap();

    let before = {
        let mut log = open_log(&dir);
        for (i, mile) in [0.0, 1.0, 2.0].into_iter().enumerate() {
            let at = start + Duration::minutes(20 * i as i64);
            log.record(NewLogEntry {
                section_id: "ca-section-a".to_string(),
                mile,
                previous_mile: if i == 0 { None } else { Some(mile - 1.0) },
                position: Position::new(32.5951 + 0.0072 * i as f64, -116.4656, at)
                    .with_accuracy(10.0),
                timestamp: Some(at),
            })
            .unwrap();
        }
        log.record(NewLogEntry {
            section_id: "ca-section-b".to_string(),
            mile: 100.0,
            previous_mile: None,
            position: Position::new(33.0, -116.5, start),
            timestamp: Some(start),
        })
        .unwrap();
        log.entries_for_section("ca-section-a")
    };

    let reopened = open_log(&dir);
    assert_eq!(reopened.len(), 4);
    assert_eq!(reopened.entries_for_section("ca-section-a"), before);

    let miles: Vec<f64> = before.iter().map(|e| e.mile).collect();
    assert_eq!(miles, vec![2.0, 1.0, 0.0]);
}

#[test]
fn test_clear_for_section_is_persisted() {
    let dir = TempDir::new().unwrap();
    {
        let mut log = open_log(&dir);
        for section in ["a", "b", "a"] {
            log.record(NewLogEntry {
                section_id: section.to_string(),
                mile: 1.0,
                previous_mile: None,
                position: Position::now(32.6023, -116.4703),
                timestamp: None,
            })
            .unwrap();
        }
        log.clear_for_section("a").unwrap();
    }

    let reopened = open_log(&dir);
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.entries()[0].section_id, "b");
}

#[test]
fn test_recorder_writes_through_to_disk() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(Mutex::new(open_log(&dir)));
    let record = recorder(Arc::clone(&log), "section-1");

    let at = Utc.with_ymd_and_hms(2024, 4, 20, 7, 0, 0).unwrap();
    record(&MileChange {
        mile: Some(0.0),
        previous_mile: None,
        position: Position::new(32.5951, -116.4656, at),
        timestamp: at,
    });
    record(&MileChange {
        mile: None,
        previous_mile: Some(0.0),
        position: Position::new(40.0, -120.0, at),
        timestamp: at,
    });
    drop(record);
    drop(log);

    let reopened = open_log(&dir);
    assert_eq!(reopened.len(), 1);
    let entry = &reopened.entries()[0];
    assert_eq!(entry.mile, 0.0);
    assert_eq!(entry.timestamp, at);

    let exported = reopened.export_json().unwrap();
    let mut copy = MileLog::open(Box::new(SqliteStore::in_memory().unwrap())).unwrap();
    assert_eq!(copy.import_json(&exported).unwrap(), 1);
    assert_eq!(copy.entries(), reopened.entries());
}
