use std::time::Duration;

use tokio::time::Instant;

use crate::dedup::ErrorDeduplicator;
use crate::error_event::{ErrorEvent, ErrorSource, Severity};

fn sensor_event(code: &str, id: Option<i32>) -> ErrorEvent {
    ErrorEvent::new(ErrorSource::Sensor(id), code, Severity::Error, "read failed")
}

#[test]
fn repeated_submissions_are_suppressed_and_counted() {
    // Arrange
    let mut dedup = ErrorDeduplicator::new(20, Duration::from_secs(600));
    let event = sensor_event("SENSOR_READ_ERROR", Some(8));
    let now = Instant::now();

    // Act
    let first = dedup.is_duplicate_at(&event, now);
    dedup.mark_sent_at(&event, now);
    let second = dedup.is_duplicate_at(&event, now);
    let third = dedup.is_duplicate_at(&event, now);

    // Assert
    assert_eq!(first, (false, 1));
    assert_eq!(second, (true, 2));
    assert_eq!(third, (true, 3));
    assert_eq!(dedup.len(), 1);
    assert_eq!(dedup.occurrences(&event), Some(3));
}

#[test]
fn key_distinguishes_source_kind_and_id() {
    // Arrange
    let mut dedup = ErrorDeduplicator::new(20, Duration::from_secs(600));
    let now = Instant::now();
    let sensor_8 = sensor_event("X", Some(8));
    let sensor_9 = sensor_event("X", Some(9));
    let controller_8 = ErrorEvent::new(ErrorSource::Controller(Some(8)), "X", Severity::Error, "m");
    let system = ErrorEvent::new(ErrorSource::System, "X", Severity::Error, "m");
    let sensor_without_id = sensor_event("X", None);

    // Act
    let results: Vec<bool> = [&sensor_8, &sensor_9, &controller_8, &system, &sensor_without_id]
        .into_iter()
        .map(|event| dedup.is_duplicate_at(event, now).0)
        .collect();

    // Assert
    assert_eq!(results, vec![false; 5]);
    assert_eq!(dedup.len(), 5);
}

#[test]
fn expired_entry_makes_error_class_fresh_again() {
    // Arrange
    let window = Duration::from_secs(600);
    let mut dedup = ErrorDeduplicator::new(20, window);
    let event = sensor_event("HTTP_SEND_FAILED", Some(9));
    let start = Instant::now();
    dedup.is_duplicate_at(&event, start);
    dedup.mark_sent_at(&event, start);
    dedup.is_duplicate_at(&event, start);

    // Act
    let evicted = dedup.evict_expired(start + window + Duration::from_secs(1));
    let after = dedup.is_duplicate_at(&event, start + window + Duration::from_secs(2));

    // Assert
    assert_eq!(evicted, 1);
    assert_eq!(after, (false, 1));
}

#[test]
fn entry_inside_window_survives_sweep() {
    // Arrange
    let window = Duration::from_secs(600);
    let mut dedup = ErrorDeduplicator::new(20, window);
    let event = sensor_event("MEMORY_LOW", None);
    let start = Instant::now();
    dedup.is_duplicate_at(&event, start);

    // Act
    let evicted = dedup.evict_expired(start + window);

    // Assert
    assert_eq!(evicted, 0);
    assert_eq!(dedup.is_duplicate_at(&event, start + window), (true, 2));
}

#[test]
fn full_table_evicts_oldest_sent_entry() {
    // Arrange
    let mut dedup = ErrorDeduplicator::new(3, Duration::from_secs(600));
    let start = Instant::now();
    let events: Vec<ErrorEvent> = (0..3).map(|id| sensor_event("E", Some(id))).collect();
    for (offset, event) in events.iter().enumerate() {
        let at = start + Duration::from_secs(offset as u64);
        dedup.is_duplicate_at(event, at);
        dedup.mark_sent_at(event, at);
    }
    // Refresh the first one so the second becomes the oldest.
    dedup.mark_sent_at(&events[0], start + Duration::from_secs(10));

    // Act
    let newcomer = sensor_event("E", Some(99));
    let result = dedup.is_duplicate_at(&newcomer, start + Duration::from_secs(11));

    // Assert
    assert_eq!(result, (false, 1));
    assert_eq!(dedup.len(), 3);
    assert_eq!(dedup.occurrences(&events[1]), None);
    assert_eq!(dedup.occurrences(&events[0]), Some(1));
    assert_eq!(dedup.occurrences(&events[2]), Some(1));
}

#[test]
fn stale_entry_is_fresh_without_a_sweep() {
    // Arrange
    let window = Duration::from_secs(600);
    let mut dedup = ErrorDeduplicator::new(20, window);
    let event = sensor_event("SENSOR_READ_ERROR", Some(8));
    let start = Instant::now();
    dedup.is_duplicate_at(&event, start);
    dedup.mark_sent_at(&event, start);

    // Act
    let inside = dedup.is_duplicate_at(&event, start + window);
    let after = dedup.is_duplicate_at(&event, start + window + Duration::from_secs(1));

    // Assert
    assert_eq!(inside, (true, 2));
    assert_eq!(after, (false, 1));
    assert_eq!(dedup.len(), 1);
    assert_eq!(dedup.occurrences(&event), Some(1));
}
